//! Integration tests for db-harvest.
//!
//! Live tests require a running SQL Server.
//! Set MSSQL_TEST_URL environment variable to run them.

pub mod connection_test;
pub mod load_test;
pub mod query_test;
pub mod summary_test;
