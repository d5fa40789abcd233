//! Connection integration tests.
//!
//! Tests SQL Server connectivity and error handling.

use db_harvest::config::ConnectionConfig;
use db_harvest::db::{Connector, DatabaseClient, MssqlClient, MssqlConnector};

/// Helper to get test connection URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("MSSQL_TEST_URL").ok()
}

fn get_test_config() -> Option<ConnectionConfig> {
    let url = get_test_database_url()?;
    let mut config = ConnectionConfig::from_connection_string(&url).ok()?;
    config.normalize_host();
    Some(config)
}

#[tokio::test]
async fn test_connect_with_valid_credentials() {
    let Some(config) = get_test_config() else {
        eprintln!("Skipping test: MSSQL_TEST_URL not set");
        return;
    };

    let client = MssqlClient::connect(&config).await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_connector_switches_database() {
    let Some(config) = get_test_config() else {
        eprintln!("Skipping test: MSSQL_TEST_URL not set");
        return;
    };

    let connector = MssqlConnector::new(config);
    let client = connector.connect(Some("tempdb")).await.unwrap();
    let result = client.execute_query("SELECT DB_NAME() AS db").await.unwrap();
    assert_eq!(result.rows[0][0].to_display_string(), "tempdb");
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let Some(config) = get_test_config() else {
        eprintln!("Skipping test: MSSQL_TEST_URL not set");
        return;
    };

    let client = MssqlClient::connect(&config).await.unwrap();
    client.close().await.unwrap();
    client.close().await.unwrap();
    assert!(client.execute_query("SELECT 1").await.is_err());
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_refused_port() {
    let config = ConnectionConfig {
        host: Some("127.0.0.1".to_string()),
        port: 1,
        database: Some("master".to_string()),
        user: Some("sa".to_string()),
        password: Some("wrong".to_string()),
        ..Default::default()
    };

    let result = MssqlClient::connect(&config).await;
    let Err(error) = result else {
        panic!("expected a connection error");
    };
    assert_eq!(error.category(), "Connection Error");
    assert!(
        error.to_string().contains("127.0.0.1"),
        "Expected the server in the message, got: {error}"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn test_sql_login_requires_password() {
    let config = ConnectionConfig {
        host: Some("127.0.0.1".to_string()),
        user: Some("sa".to_string()),
        ..Default::default()
    };

    let Err(error) = MssqlClient::connect(&config).await else {
        panic!("expected a configuration error");
    };
    assert_eq!(error.category(), "Configuration Error");
}
