//! Query execution for db-harvest.
//!
//! Isolates the connect/query/close sequence from the command handlers.

pub mod executor;

pub use executor::{close_quietly, QueryExecutor};
