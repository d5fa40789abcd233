//! Server catalog summary.
//!
//! Walks every user database, lists its tables from `INFORMATION_SCHEMA.TABLES`
//! and the column names of each table from `sys.columns`, then writes two
//! workbooks with one sheet per database:
//!
//! - `Tables_<date>_summary.xlsx`: the raw table listing.
//! - `Tables-Columns_<date>_summary.xlsx`: one `Table`/`Columns` row per column,
//!   plus optional per-table detail sheets.
//!
//! A table whose columns cannot be read is logged and skipped; a database whose
//! tables cannot be listed is logged and left out.

use crate::config::SummaryConfig;
use crate::db::naming::{quote_literal, strip_brackets};
use crate::db::{ColumnInfo, Connector, QueryResult, TableRef, Value};
use crate::error::{HarvestError, Result};
use crate::export::ReportWriter;
use crate::query::QueryExecutor;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Lists every database on the server.
pub const DATABASES_SQL: &str = "SELECT name FROM sys.databases ORDER BY name";

/// Lists the tables and views of the current database.
pub const TABLES_SQL: &str = "SELECT * FROM INFORMATION_SCHEMA.TABLES";

/// Detail sheet names keep this many characters of the table name.
const DETAIL_SHEET_CHARS: usize = 30;

/// Column names of one table, in definition order.
pub fn columns_sql(table: &TableRef) -> String {
    format!(
        "SELECT name FROM sys.columns WHERE object_id = OBJECT_ID({}) ORDER BY column_id",
        quote_literal(&table.quoted())
    )
}

/// Everything collected for one database.
#[derive(Debug, Clone)]
pub struct DatabaseCatalog {
    pub database: String,
    /// The `INFORMATION_SCHEMA.TABLES` listing as returned.
    pub tables: QueryResult,
    /// `Table`/`Columns` pairs for every table that could be read.
    pub columns: QueryResult,
    /// Per-table column listings, when detail sheets are requested.
    pub details: Vec<(String, QueryResult)>,
    /// Tables whose columns could not be read.
    pub failed_tables: Vec<String>,
}

/// Result of walking the server.
#[derive(Debug, Clone, Default)]
pub struct CatalogReport {
    pub databases: Vec<DatabaseCatalog>,
    /// Databases whose table listing failed.
    pub skipped_databases: Vec<String>,
}

/// The two workbooks written by a summary run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOutput {
    pub tables_workbook: PathBuf,
    pub columns_workbook: PathBuf,
    /// Sheet names of the tables workbook, in order. Filled by `write_report`.
    pub tables_sheets: Vec<String>,
    /// Sheet names of the columns workbook, in order. Filled by `write_report`.
    pub columns_sheets: Vec<String>,
}

impl SummaryOutput {
    /// Workbook paths for a run on `date`.
    pub fn for_date(output_dir: &Path, date: NaiveDate) -> Self {
        let day = date.format("%Y-%m-%d");
        Self {
            tables_workbook: output_dir.join(format!("Tables_{day}_summary.xlsx")),
            columns_workbook: output_dir.join(format!("Tables-Columns_{day}_summary.xlsx")),
            tables_sheets: Vec::new(),
            columns_sheets: Vec::new(),
        }
    }
}

/// Walks databases → tables → columns through a connector.
pub struct CatalogBuilder<'a> {
    executor: QueryExecutor<'a>,
    config: &'a SummaryConfig,
}

impl<'a> CatalogBuilder<'a> {
    pub fn new(connector: &'a dyn Connector, config: &'a SummaryConfig) -> Self {
        Self {
            executor: QueryExecutor::new(connector),
            config,
        }
    }

    /// User databases on the server, minus the excluded ones.
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        let result = self.executor.query_statement(None, DATABASES_SQL).await?;
        let databases = result
            .column_values(0)
            .filter_map(text_of)
            .filter(|name| !self.config.is_excluded(name))
            .collect::<Vec<_>>();
        info!("Found {} databases to catalog", databases.len());
        Ok(databases)
    }

    /// Lists the tables of `database` and the columns of each table.
    pub async fn catalog_database(&self, database: &str) -> Result<DatabaseCatalog> {
        let tables = self
            .executor
            .query_statement(Some(database), TABLES_SQL)
            .await?;

        let schema_index = tables.column_index("TABLE_SCHEMA").unwrap_or(1);
        let name_index = tables.column_index("TABLE_NAME").unwrap_or(2);

        let mut catalog = DatabaseCatalog {
            database: database.to_string(),
            columns: QueryResult::with_data(
                vec![ColumnInfo::new("Table", "text"), ColumnInfo::new("Columns", "text")],
                Vec::new(),
            ),
            details: Vec::new(),
            failed_tables: Vec::new(),
            tables,
        };

        let total = catalog.tables.rows.len();
        let entries: Vec<TableRef> = catalog
            .tables
            .rows
            .iter()
            .filter_map(|row| {
                let schema = row.get(schema_index).and_then(text_of)?;
                let name = row.get(name_index).and_then(text_of)?;
                Some(TableRef::with_schema(schema, name))
            })
            .collect();

        for (i, table) in entries.iter().enumerate() {
            let label = table.display_name();
            info!("[{}/{total}] Table: {label}", i + 1);

            let columns = match self
                .executor
                .query_statement(Some(database), &columns_sql(table))
                .await
            {
                Ok(columns) => columns,
                Err(e) => {
                    warn!("Parsing table {label} failed: {e}");
                    catalog.failed_tables.push(label);
                    continue;
                }
            };

            for name in columns.column_values(0).filter_map(text_of) {
                catalog
                    .columns
                    .push_row(vec![Value::String(label.clone()), Value::String(name)]);
            }

            if self.config.show_column_details {
                catalog.details.push((label, columns));
            }
        }

        Ok(catalog)
    }

    /// Catalogs every database; failed databases are recorded, not fatal.
    pub async fn build(&self) -> Result<CatalogReport> {
        let mut report = CatalogReport::default();
        for database in self.list_databases().await? {
            match self.catalog_database(&database).await {
                Ok(catalog) => report.databases.push(catalog),
                Err(e) => {
                    error!("Skipping database {database}: {e}");
                    report.skipped_databases.push(database);
                }
            }
        }
        Ok(report)
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_display_string()),
    }
}

/// Sheet name for a per-table detail sheet.
fn detail_sheet_name(table: &str) -> String {
    strip_brackets(table)
        .chars()
        .take(DETAIL_SHEET_CHARS)
        .collect()
}

/// Writes both workbooks for `report` and records their sheet names in `output`.
pub fn write_report(report: &CatalogReport, output: &mut SummaryOutput) -> Result<()> {
    let mut tables = ReportWriter::new(&output.tables_workbook);
    let mut columns = ReportWriter::new(&output.columns_workbook);

    for catalog in &report.databases {
        tables.add_frame(&catalog.database, &catalog.tables)?;
        for (table, detail) in &catalog.details {
            columns.add_frame(&detail_sheet_name(table), detail)?;
        }
        columns.add_frame(&catalog.database, &catalog.columns)?;
    }

    output.tables_sheets = tables.sheet_names().to_vec();
    output.columns_sheets = columns.sheet_names().to_vec();
    tables.save()?;
    columns.save()?;
    Ok(())
}

/// Runs the whole catalog summary and writes the workbooks into `output_dir`.
pub async fn run_summary(
    connector: &dyn Connector,
    config: &SummaryConfig,
    output_dir: &Path,
    date: NaiveDate,
) -> Result<(CatalogReport, SummaryOutput)> {
    if output_dir.exists() && !output_dir.is_dir() {
        return Err(HarvestError::config(format!(
            "Output path {} is not a directory",
            output_dir.display()
        )));
    }

    let report = CatalogBuilder::new(connector, config).build().await?;
    let mut output = SummaryOutput::for_date(output_dir, date);
    write_report(&report, &mut output)?;

    let failed: usize = report.databases.iter().map(|d| d.failed_tables.len()).sum();
    info!(
        "Catalogued {} databases ({} skipped, {failed} tables failed)",
        report.databases.len(),
        report.skipped_databases.len()
    );
    Ok((report, output))
}
