//! Query execution integration tests.
//!
//! Tests table and statement extraction through the request-scoped executor.

use db_harvest::config::ConnectionConfig;
use db_harvest::db::{names_result, ColumnInfo, MockConnector, MssqlConnector, QueryResult, TableRef, Value};
use db_harvest::query::QueryExecutor;
use db_harvest::transform::format_sql_datetime;

fn get_test_connector() -> Option<MssqlConnector> {
    let url = std::env::var("MSSQL_TEST_URL").ok()?;
    let mut config = ConnectionConfig::from_connection_string(&url).ok()?;
    config.normalize_host();
    Some(MssqlConnector::new(config))
}

#[tokio::test]
async fn test_query_table_by_bracketed_name() {
    let frame = QueryResult::with_data(
        vec![ColumnInfo::new("Id", "int"), ColumnInfo::new("Region", "nvarchar")],
        vec![
            vec![Value::Int(1), Value::from("West")],
            vec![Value::Int(2), Value::from("East")],
        ],
    );
    let connector = MockConnector::new().respond_on("Shop", "FROM [dbo].[Sales Orders]", frame);
    let executor = QueryExecutor::new(&connector);
    let table = TableRef::parse("[dbo].[Sales Orders]").unwrap();

    let result = executor
        .query_table(Some("Shop"), &table, Some("WHERE Region <> 'North'"))
        .await
        .unwrap();

    assert_eq!(result.row_count, 2);
    assert_eq!(
        connector.statements(),
        vec!["SELECT * FROM [dbo].[Sales Orders] WHERE Region <> 'North'"]
    );
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn test_each_query_uses_its_own_connection() {
    let connector = MockConnector::new().respond("sys.tables", names_result("name", &["Orders"]));
    let executor = QueryExecutor::new(&connector);

    for _ in 0..3 {
        executor
            .query_statement(Some("Shop"), "SELECT name FROM sys.tables")
            .await
            .unwrap();
    }

    assert_eq!(connector.opened(), 3);
    assert_eq!(connector.closed(), 3);
}

#[tokio::test]
async fn test_linked_server_routing() {
    let connector = MockConnector::new().with_linked_server("LEGACY");
    let executor = QueryExecutor::new(&connector);

    executor
        .query_table(Some("Archive"), &TableRef::parse("hist.Orders").unwrap(), None)
        .await
        .unwrap();
    executor
        .query_table(
            Some("Archive"),
            &TableRef::parse("OTHER.Db.dbo.Orders").unwrap(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        connector.statements(),
        vec![
            "SELECT * FROM [LEGACY].[Archive].[hist].[Orders]",
            "SELECT * FROM [OTHER].[Db].[dbo].[Orders]",
        ]
    );
}

#[tokio::test]
async fn test_live_select_and_format() {
    let Some(connector) = get_test_connector() else {
        eprintln!("Skipping test: MSSQL_TEST_URL not set");
        return;
    };
    let executor = QueryExecutor::new(&connector);

    let mut result = executor
        .query_statement(
            None,
            "SELECT 1 AS num, N'hello' AS greeting, CAST('2024-01-15T10:30:45.1234567' AS DATETIME2) AS ts, CAST(NULL AS INT) AS nothing",
        )
        .await
        .unwrap();

    assert_eq!(result.columns.len(), 4);
    assert_eq!(result.columns[0].name, "num");
    assert_eq!(result.rows[0][0], Value::Int(1));
    assert_eq!(result.rows[0][1], Value::from("hello"));
    assert_eq!(result.rows[0][3], Value::Null);

    format_sql_datetime(&mut result, "ts").unwrap();
    assert_eq!(result.rows[0][2], Value::from("2024-01-15 10:30:45.123"));
}

#[tokio::test]
async fn test_live_query_error_is_returned() {
    let Some(connector) = get_test_connector() else {
        eprintln!("Skipping test: MSSQL_TEST_URL not set");
        return;
    };
    let executor = QueryExecutor::new(&connector);

    let err = executor
        .query_table(None, &TableRef::parse("dbo.NoSuchTable_harvest").unwrap(), None)
        .await
        .unwrap_err();
    assert_eq!(err.category(), "Query Error");
}
