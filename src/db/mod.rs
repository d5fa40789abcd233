//! Database abstraction layer for db-harvest.
//!
//! Provides a trait-based interface for database operations so the extraction
//! flows run the same against SQL Server, Snowflake, or the in-memory mock.

mod mock;
mod mssql;
pub mod naming;
mod types;

pub use mock::{names_result, MockConnector, MockDatabaseClient};
pub use mssql::{MssqlClient, MssqlConnector};
pub use naming::TableRef;
pub use types::{ColumnInfo, QueryResult, Row, Value};

use crate::error::Result;
use async_trait::async_trait;

/// Trait defining the interface for database clients.
///
/// All database operations are async and return Results with HarvestError.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Executes a SQL query and returns its first result set, fully materialized.
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;

    /// Executes a batch without collecting rows.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Closes the database connection.
    async fn close(&self) -> Result<()>;
}

/// Opens clients against a server, one database at a time.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection; `None` uses the configured default database.
    async fn connect(&self, database: Option<&str>) -> Result<Box<dyn DatabaseClient>>;

    /// Linked server table references are routed through, if any.
    fn linked_server(&self) -> Option<&str> {
        None
    }
}
