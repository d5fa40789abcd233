//! Catalog summary integration tests.

use chrono::NaiveDate;
use db_harvest::config::{ConnectionConfig, SummaryConfig};
use db_harvest::db::{names_result, ColumnInfo, MockConnector, MssqlConnector, QueryResult, Value};
use db_harvest::summary::{run_summary, CatalogBuilder, SummaryOutput};
use pretty_assertions::assert_eq;

fn tables(entries: &[(&str, &str, &str)]) -> QueryResult {
    QueryResult::with_data(
        vec![
            ColumnInfo::new("TABLE_CATALOG", "nvarchar"),
            ColumnInfo::new("TABLE_SCHEMA", "nvarchar"),
            ColumnInfo::new("TABLE_NAME", "nvarchar"),
            ColumnInfo::new("TABLE_TYPE", "varchar"),
        ],
        entries
            .iter()
            .map(|(db, schema, name)| {
                vec![
                    Value::from(*db),
                    Value::from(*schema),
                    Value::from(*name),
                    Value::from("BASE TABLE"),
                ]
            })
            .collect(),
    )
}

fn scripted_server() -> MockConnector {
    MockConnector::new()
        .respond(
            "sys.databases",
            names_result("name", &["master", "Sales", "tempdb", "HR", "Broken", "msdb"]),
        )
        .respond_on(
            "Sales",
            "INFORMATION_SCHEMA.TABLES",
            tables(&[
                ("Sales", "dbo", "Orders"),
                ("Sales", "dbo", "Customers"),
                ("Sales", "audit", "Log"),
            ]),
        )
        .respond_on("Sales", "[dbo].[Orders]", names_result("name", &["Id", "Total"]))
        .respond_on(
            "Sales",
            "[dbo].[Customers]",
            names_result("name", &["Id", "Name", "Email"]),
        )
        .fail_on("Sales", "[audit].[Log]", "The SELECT permission was denied")
        .respond_on("HR", "INFORMATION_SCHEMA.TABLES", tables(&[]))
        .fail_on("Broken", "INFORMATION_SCHEMA.TABLES", "Database 'Broken' is offline")
}

#[tokio::test]
async fn test_catalog_walks_databases_tables_columns() {
    let connector = scripted_server();
    let config = SummaryConfig::default();

    let report = CatalogBuilder::new(&connector, &config).build().await.unwrap();

    let names: Vec<&str> = report.databases.iter().map(|d| d.database.as_str()).collect();
    assert_eq!(names, vec!["Sales", "HR"]);
    assert_eq!(report.skipped_databases, vec!["Broken".to_string()]);

    let sales = &report.databases[0];
    assert_eq!(sales.tables.row_count, 3);
    assert_eq!(sales.failed_tables, vec!["audit.Log".to_string()]);
    assert!(sales.details.is_empty());

    let pairs: Vec<(String, String)> = sales
        .columns
        .rows
        .iter()
        .map(|row| (row[0].to_display_string(), row[1].to_display_string()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("dbo.Orders".to_string(), "Id".to_string()),
            ("dbo.Orders".to_string(), "Total".to_string()),
            ("dbo.Customers".to_string(), "Id".to_string()),
            ("dbo.Customers".to_string(), "Name".to_string()),
            ("dbo.Customers".to_string(), "Email".to_string()),
        ]
    );

    let hr = &report.databases[1];
    assert!(hr.tables.is_empty());
    assert!(hr.columns.is_empty());

    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn test_excluded_databases_are_never_opened() {
    let connector = scripted_server();
    let mut config = SummaryConfig::default();
    config.excluded_databases.push("hr".to_string());

    CatalogBuilder::new(&connector, &config).build().await.unwrap();

    let touched: Vec<Option<String>> = connector.executed().into_iter().map(|(db, _)| db).collect();
    for excluded in ["master", "tempdb", "msdb", "HR"] {
        assert!(!touched.contains(&Some(excluded.to_string())));
    }
}

#[tokio::test]
async fn test_run_summary_writes_both_workbooks() {
    let connector = scripted_server();
    let config = SummaryConfig {
        show_column_details: true,
        ..Default::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let date = NaiveDate::from_ymd_opt(2022, 11, 17).unwrap();

    let (report, output) = run_summary(&connector, &config, dir.path(), date).await.unwrap();

    let expected = SummaryOutput::for_date(dir.path(), date);
    assert_eq!(output.tables_workbook, expected.tables_workbook);
    assert_eq!(output.columns_workbook, expected.columns_workbook);
    assert!(output.tables_workbook.ends_with("Tables_2022-11-17_summary.xlsx"));
    assert!(output.columns_workbook.ends_with("Tables-Columns_2022-11-17_summary.xlsx"));
    assert!(output.tables_workbook.exists());
    assert!(output.columns_workbook.exists());

    assert_eq!(output.tables_sheets, vec!["Sales", "HR"]);
    assert_eq!(
        output.columns_sheets,
        vec!["dbo.Orders", "dbo.Customers", "Sales", "HR"]
    );

    let detail_tables: Vec<&str> = report.databases[0]
        .details
        .iter()
        .map(|(table, _)| table.as_str())
        .collect();
    assert_eq!(detail_tables, vec!["dbo.Orders", "dbo.Customers"]);
}

#[tokio::test]
async fn test_run_summary_without_details_has_one_sheet_per_database() {
    let connector = scripted_server();
    let dir = tempfile::tempdir().unwrap();
    let date = NaiveDate::from_ymd_opt(2022, 11, 17).unwrap();

    let (report, output) = run_summary(&connector, &SummaryConfig::default(), dir.path(), date)
        .await
        .unwrap();

    assert_eq!(output.tables_sheets, vec!["Sales", "HR"]);
    assert_eq!(output.columns_sheets, vec!["Sales", "HR"]);
    assert_eq!(report.databases[0].columns.row_count, 5);
}

#[tokio::test]
async fn test_run_summary_fails_when_databases_cannot_be_listed() {
    let connector = MockConnector::new().fail("sys.databases", "Login failed for user 'etl'");
    let dir = tempfile::tempdir().unwrap();
    let date = NaiveDate::from_ymd_opt(2022, 11, 17).unwrap();

    let err = run_summary(&connector, &SummaryConfig::default(), dir.path(), date)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Login failed"));
    assert!(!SummaryOutput::for_date(dir.path(), date).tables_workbook.exists());
}

#[tokio::test]
async fn test_live_summary() {
    let Some(url) = std::env::var("MSSQL_TEST_URL").ok() else {
        eprintln!("Skipping test: MSSQL_TEST_URL not set");
        return;
    };
    let mut config = ConnectionConfig::from_connection_string(&url).unwrap();
    config.normalize_host();
    let connector = MssqlConnector::new(config);
    let dir = tempfile::tempdir().unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

    let (_, output) = run_summary(&connector, &SummaryConfig::default(), dir.path(), date)
        .await
        .unwrap();
    assert!(output.tables_workbook.exists());
    assert!(output.columns_workbook.exists());
}
