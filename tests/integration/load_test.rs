//! Loader integration tests.
//!
//! Drives `write_frame` against the mock client and, when MSSQL_TEST_URL is
//! set, against a live server.

use db_harvest::config::ConnectionConfig;
use db_harvest::db::{ColumnInfo, Connector, MockConnector, MssqlConnector, QueryResult, Value};
use db_harvest::loader::{target_table, write_frame, LoadMode, CHUNK_SIZE};
use db_harvest::query::close_quietly;
use pretty_assertions::assert_eq;

fn numbered_frame(rows: usize) -> QueryResult {
    QueryResult::with_data(
        vec![ColumnInfo::new("Id", "int"), ColumnInfo::new("Label", "nvarchar")],
        (0..rows)
            .map(|i| vec![Value::Int(i as i64), Value::from(format!("row {i}"))])
            .collect(),
    )
}

fn exists(flag: i64) -> QueryResult {
    QueryResult::with_data(
        vec![ColumnInfo::new("table_exists", "int")],
        vec![vec![Value::Int(flag)]],
    )
}

#[tokio::test]
async fn test_new_table_is_created_and_chunked() {
    let connector = MockConnector::new();
    let client = connector.connect(Some("Warehouse")).await.unwrap();
    let table = target_table("staging.Items").unwrap();

    let loaded = write_frame(client.as_ref(), &numbered_frame(450), &table, LoadMode::Fail, false)
        .await
        .unwrap();
    close_quietly(client.as_ref()).await;

    assert_eq!(loaded, 450);
    let statements = connector.statements();
    assert_eq!(statements[1], "BEGIN TRANSACTION");
    assert_eq!(
        statements[2],
        "CREATE TABLE [staging].[Items] ([Id] BIGINT NULL, [Label] NVARCHAR(MAX) NULL)"
    );
    let inserts: Vec<&String> = statements
        .iter()
        .filter(|s| s.starts_with("INSERT INTO [staging].[Items]"))
        .collect();
    assert_eq!(inserts.len(), 450_usize.div_ceil(CHUNK_SIZE));
    assert!(inserts[2].contains("(449, N'row 449')"));
    assert_eq!(statements.last().unwrap(), "COMMIT TRANSACTION");
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn test_existing_table_modes() {
    let table = target_table("Items").unwrap();

    let connector = MockConnector::new().respond("table_exists", exists(1));
    let client = connector.connect(None).await.unwrap();
    let err = write_frame(client.as_ref(), &numbered_frame(1), &table, LoadMode::Fail, false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
    assert_eq!(connector.statements().len(), 1);

    let connector = MockConnector::new().respond("table_exists", exists(1));
    let client = connector.connect(None).await.unwrap();
    write_frame(client.as_ref(), &numbered_frame(1), &table, LoadMode::Replace, false)
        .await
        .unwrap();
    let statements = connector.statements();
    assert_eq!(statements[2], "DROP TABLE [dbo].[Items]");
    assert!(statements[3].starts_with("CREATE TABLE [dbo].[Items]"));

    let connector = MockConnector::new().respond("table_exists", exists(1));
    let client = connector.connect(None).await.unwrap();
    write_frame(client.as_ref(), &numbered_frame(1), &table, LoadMode::Append, false)
        .await
        .unwrap();
    assert!(!connector
        .statements()
        .iter()
        .any(|s| s.starts_with("CREATE") || s.starts_with("DROP")));
}

#[tokio::test]
async fn test_failed_insert_rolls_back() {
    let connector = MockConnector::new().fail("INSERT INTO", "Arithmetic overflow");
    let client = connector.connect(None).await.unwrap();

    let err = write_frame(
        client.as_ref(),
        &numbered_frame(3),
        &target_table("Items").unwrap(),
        LoadMode::Append,
        true,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("Arithmetic overflow"));
    let statements = connector.statements();
    assert_eq!(statements.last().unwrap(), "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION");
    assert!(!statements.iter().any(|s| s == "COMMIT TRANSACTION"));
}

#[tokio::test]
async fn test_live_round_trip() {
    let Some(url) = std::env::var("MSSQL_TEST_URL").ok() else {
        eprintln!("Skipping test: MSSQL_TEST_URL not set");
        return;
    };
    let mut config = ConnectionConfig::from_connection_string(&url).unwrap();
    config.normalize_host();
    let connector = MssqlConnector::new(config);
    let client = connector.connect(Some("tempdb")).await.unwrap();
    let table = target_table("dbo.harvest_load_test").unwrap();

    write_frame(client.as_ref(), &numbered_frame(250), &table, LoadMode::Replace, false)
        .await
        .unwrap();
    write_frame(client.as_ref(), &numbered_frame(5), &table, LoadMode::Append, false)
        .await
        .unwrap();

    let count = client
        .execute_query("SELECT COUNT(*) AS n FROM [dbo].[harvest_load_test]")
        .await
        .unwrap();
    assert_eq!(count.rows[0][0], Value::Int(255));

    client.execute("DROP TABLE [dbo].[harvest_load_test]").await.unwrap();
    client.close().await.unwrap();
}
