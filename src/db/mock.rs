//! Mock database client for testing.
//!
//! Provides a scripted in-memory connector that returns canned results by SQL
//! pattern and records every statement and connection it sees.

use super::{ColumnInfo, Connector, DatabaseClient, QueryResult, Value};
use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Rows(QueryResult),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Rule {
    database: Option<String>,
    pattern: String,
    response: Scripted,
}

#[derive(Debug, Default)]
struct MockState {
    rules: Vec<Rule>,
    unreachable: Vec<String>,
    log: Vec<(Option<String>, String)>,
    opened: usize,
    closed: usize,
}

/// A scripted connector handing out `MockDatabaseClient`s that share state.
///
/// Rules are matched in insertion order; a rule matches when its pattern is a
/// substring of the SQL and its database (if any) equals the connection's.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    linked_server: Option<String>,
}

impl MockConnector {
    /// Creates a connector that answers every query with an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answers queries containing `pattern` on any database.
    pub fn respond(self, pattern: &str, result: QueryResult) -> Self {
        self.push_rule(None, pattern, Scripted::Rows(result))
    }

    /// Answers queries containing `pattern` on one database only.
    pub fn respond_on(self, database: &str, pattern: &str, result: QueryResult) -> Self {
        self.push_rule(Some(database), pattern, Scripted::Rows(result))
    }

    /// Fails queries containing `pattern` on any database.
    pub fn fail(self, pattern: &str, message: &str) -> Self {
        self.push_rule(None, pattern, Scripted::Fail(message.to_string()))
    }

    /// Fails queries containing `pattern` on one database only.
    pub fn fail_on(self, database: &str, pattern: &str, message: &str) -> Self {
        self.push_rule(Some(database), pattern, Scripted::Fail(message.to_string()))
    }

    /// Refuses connections to `database`.
    pub fn unreachable(self, database: &str) -> Self {
        self.state().unreachable.push(database.to_string());
        self
    }

    /// Reports a linked server to callers.
    pub fn with_linked_server(mut self, server: &str) -> Self {
        self.linked_server = Some(server.to_string());
        self
    }

    fn push_rule(self, database: Option<&str>, pattern: &str, response: Scripted) -> Self {
        self.state().rules.push(Rule {
            database: database.map(String::from),
            pattern: pattern.to_string(),
            response,
        });
        self
    }

    /// Every statement executed so far, with the database it ran against.
    pub fn executed(&self) -> Vec<(Option<String>, String)> {
        self.state().log.clone()
    }

    /// Statements executed so far, without databases.
    pub fn statements(&self) -> Vec<String> {
        self.state().log.iter().map(|(_, sql)| sql.clone()).collect()
    }

    /// Number of connections opened.
    pub fn opened(&self) -> usize {
        self.state().opened
    }

    /// Number of connections closed.
    pub fn closed(&self) -> usize {
        self.state().closed
    }

    /// Connections opened but not yet closed.
    pub fn open_connections(&self) -> usize {
        let state = self.state();
        state.opened - state.closed
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, database: Option<&str>) -> Result<Box<dyn DatabaseClient>> {
        let mut state = self.state();
        if let Some(db) = database {
            if state.unreachable.iter().any(|u| u == db) {
                return Err(HarvestError::connection(format!(
                    "Cannot open database \"{db}\" requested by the login"
                )));
            }
        }
        state.opened += 1;
        drop(state);

        Ok(Box::new(MockDatabaseClient {
            state: Arc::clone(&self.state),
            database: database.map(String::from),
            closed: Mutex::new(false),
        }))
    }

    fn linked_server(&self) -> Option<&str> {
        self.linked_server.as_deref()
    }
}

/// A mock database client bound to one database of a `MockConnector`.
pub struct MockDatabaseClient {
    state: Arc<Mutex<MockState>>,
    database: Option<String>,
    closed: Mutex<bool>,
}

impl MockDatabaseClient {
    /// Creates a standalone client that answers every query with an empty result.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            database: None,
            closed: Mutex::new(false),
        }
    }

    fn run(&self, sql: &str) -> Result<QueryResult> {
        if *self.closed.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(HarvestError::connection("Connection already closed"));
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.log.push((self.database.clone(), sql.to_string()));

        let rule = state.rules.iter().find(|rule| {
            sql.contains(&rule.pattern)
                && rule
                    .database
                    .as_ref()
                    .map_or(true, |db| Some(db) == self.database.as_ref())
        });

        match rule.map(|r| r.response.clone()) {
            Some(Scripted::Rows(result)) => Ok(result.with_execution_time(Duration::from_millis(1))),
            Some(Scripted::Fail(message)) => Err(HarvestError::query(message)),
            None => Ok(QueryResult::new().with_execution_time(Duration::from_millis(1))),
        }
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        self.run(sql)
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.run(sql).map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if !*closed {
            *closed = true;
            self.state.lock().unwrap_or_else(|e| e.into_inner()).closed += 1;
        }
        Ok(())
    }
}

/// Builds a single-column text result, handy for name listings.
pub fn names_result(column: &str, names: &[&str]) -> QueryResult {
    QueryResult::with_data(
        vec![ColumnInfo::new(column, "nvarchar")],
        names.iter().map(|n| vec![Value::from(*n)]).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_default_is_empty() {
        let client = MockDatabaseClient::new();
        let result = client.execute_query("SELECT 1").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_mock_rules_by_database() {
        let connector = MockConnector::new()
            .respond_on("Sales", "sys.columns", names_result("name", &["Amount"]))
            .respond("sys.columns", names_result("name", &["Other"]));

        let sales = connector.connect(Some("Sales")).await.unwrap();
        let hr = connector.connect(Some("HR")).await.unwrap();

        let r = sales.execute_query("SELECT name FROM sys.columns").await.unwrap();
        assert_eq!(r.rows[0][0], Value::from("Amount"));
        let r = hr.execute_query("SELECT name FROM sys.columns").await.unwrap();
        assert_eq!(r.rows[0][0], Value::from("Other"));

        sales.close().await.unwrap();
        hr.close().await.unwrap();
        assert_eq!(connector.open_connections(), 0);
        assert_eq!(connector.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_failures() {
        let connector = MockConnector::new()
            .fail("DROP", "permission denied")
            .unreachable("Locked");

        assert!(connector.connect(Some("Locked")).await.is_err());

        let client = connector.connect(None).await.unwrap();
        assert!(client.execute("DROP TABLE x").await.is_err());
        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(connector.closed(), 1);
        assert!(client.execute_query("SELECT 1").await.is_err());
    }
}
