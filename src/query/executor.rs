//! Request-scoped query execution.
//!
//! Every call opens its own connection, runs one query, logs the outcome and
//! closes the connection again, on success and on failure alike.

use crate::db::{Connector, DatabaseClient, QueryResult, TableRef};
use crate::error::Result;
use tracing::{debug, error, info, warn};

/// Runs table and statement queries through a connector.
pub struct QueryExecutor<'a> {
    connector: &'a dyn Connector,
}

impl<'a> QueryExecutor<'a> {
    /// Creates a new query executor.
    pub fn new(connector: &'a dyn Connector) -> Self {
        Self { connector }
    }

    /// Builds the `SELECT *` statement for a table query.
    ///
    /// `condition` is appended as given, so it carries its own `WHERE`.
    /// Tables are routed through the connector's linked server when one is
    /// configured and the name does not already carry a server part.
    pub fn table_sql(
        &self,
        table: &TableRef,
        database: Option<&str>,
        condition: Option<&str>,
    ) -> Result<String> {
        let table = match self.connector.linked_server() {
            Some(server) if table.server.is_none() => {
                table.clone().via_linked_server(server, database)?
            }
            _ => table.clone(),
        };

        let mut sql = format!("SELECT * FROM {}", table.quoted());
        if let Some(clause) = condition.map(str::trim).filter(|c| !c.is_empty()) {
            sql.push(' ');
            sql.push_str(clause);
        }
        Ok(sql)
    }

    /// Fetches every column and row of `table`, optionally filtered by `condition`.
    pub async fn query_table(
        &self,
        database: Option<&str>,
        table: &TableRef,
        condition: Option<&str>,
    ) -> Result<QueryResult> {
        let sql = self.table_sql(table, database, condition)?;
        let result = self.run(database, &sql).await?;
        info!(
            "{} data fetched successfully ({} rows).",
            table.display_name(),
            result.row_count
        );
        Ok(result)
    }

    /// Runs an arbitrary statement and returns its first result set.
    pub async fn query_statement(&self, database: Option<&str>, sql: &str) -> Result<QueryResult> {
        let result = self.run(database, sql).await?;
        info!(
            "Query executed successfully ({} rows in {:?})",
            result.row_count, result.execution_time
        );
        Ok(result)
    }

    async fn run(&self, database: Option<&str>, sql: &str) -> Result<QueryResult> {
        let target = database.unwrap_or("default database");
        debug!("Running on {target}: {sql}");

        let client = self.connector.connect(database).await.map_err(|e| {
            error!("Error connecting to {target}: {e}");
            e
        })?;

        let result = client.execute_query(sql).await;
        close_quietly(client.as_ref()).await;

        result.map_err(|e| {
            error!("Error retrieving entry from {target}: {e}");
            e
        })
    }
}

/// Closes a client, logging rather than returning a failure to close.
pub async fn close_quietly(client: &dyn DatabaseClient) {
    if let Err(e) = client.close().await {
        warn!("Failed to close connection: {e}");
    }
}
