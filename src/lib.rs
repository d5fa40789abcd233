//! db-harvest - SQL Server extraction and cataloguing toolkit.
//!
//! This library exposes the core modules for use by the `harvest` binary and
//! integration tests.

pub mod app;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod loader;
pub mod logging;
pub mod query;
pub mod snowflake;
pub mod storage;
pub mod summary;
pub mod transform;
