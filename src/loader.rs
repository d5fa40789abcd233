//! Writes frames into SQL Server tables.
//!
//! The target table is created from the frame's inferred column types and
//! filled with multi-row `INSERT ... VALUES` batches inside one transaction.

use crate::db::naming::{quote_ident, quote_literal, DEFAULT_SCHEMA};
use crate::db::{DatabaseClient, QueryResult, TableRef, Value};
use crate::error::{HarvestError, Result};
use crate::transform::SQL_DATETIME_FORMAT;
use std::fmt::Write as _;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Rows sent per INSERT statement.
pub const CHUNK_SIZE: usize = 200;

/// What to do when the target table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Refuse to touch an existing table.
    #[default]
    Fail,
    /// Drop and recreate the table.
    Replace,
    /// Insert into the existing table, creating it if missing.
    Append,
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            _ => Err(format!(
                "Invalid load mode: {s}. Expected: fail, replace, or append"
            )),
        }
    }
}

/// SQL Server column type for a frame column.
fn infer_sql_type(frame: &QueryResult, index: usize) -> &'static str {
    let mut kind: Option<&'static str> = None;
    for value in frame.column_values(index) {
        let this = match value {
            Value::Null => continue,
            Value::Bool(_) => "BIT",
            Value::Int(_) => "BIGINT",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "NVARCHAR(MAX)",
            Value::Bytes(_) => "VARBINARY(MAX)",
            Value::Date(_) => "DATE",
            Value::DateTime(_) => "DATETIME2(3)",
        };
        kind = match (kind, this) {
            (None, t) => Some(t),
            (Some(a), b) if a == b => Some(a),
            (Some("BIGINT"), "FLOAT") | (Some("FLOAT"), "BIGINT") => Some("FLOAT"),
            (Some("DATE"), "DATETIME2(3)") | (Some("DATETIME2(3)"), "DATE") => Some("DATETIME2(3)"),
            _ => return "NVARCHAR(MAX)",
        };
    }
    kind.unwrap_or("NVARCHAR(MAX)")
}

/// Renders a value as a T-SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format!("{f:?}"),
        Value::Float(_) => "NULL".to_string(),
        Value::String(s) => quote_literal(s),
        Value::Bytes(b) => {
            let mut hex = String::with_capacity(2 + b.len() * 2);
            hex.push_str("0x");
            for byte in b {
                let _ = write!(hex, "{byte:02X}");
            }
            hex
        }
        Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        Value::DateTime(dt) => format!("'{}'", dt.format(SQL_DATETIME_FORMAT)),
    }
}

/// Resolves the target name; an unqualified name lands in `dbo`.
pub fn target_table(name: &str) -> Result<TableRef> {
    let mut table = TableRef::parse(name)?;
    if table.server.is_some() {
        return Err(HarvestError::config(format!(
            "Cannot load into a linked server table: '{name}'"
        )));
    }
    if table.schema.is_none() {
        table.schema = Some(DEFAULT_SCHEMA.to_string());
    }
    Ok(table)
}

/// `CREATE TABLE` for the frame's columns.
pub fn create_table_sql(frame: &QueryResult, table: &TableRef) -> Result<String> {
    if frame.columns.is_empty() {
        return Err(HarvestError::data("Cannot create a table with no columns"));
    }
    let columns = frame
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} {} NULL", quote_ident(&c.name), infer_sql_type(frame, i)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("CREATE TABLE {} ({columns})", table.quoted()))
}

/// Multi-row `INSERT` statements, `CHUNK_SIZE` rows each.
pub fn insert_sql(frame: &QueryResult, table: &TableRef) -> Vec<String> {
    let column_list = frame
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    frame
        .rows
        .chunks(CHUNK_SIZE)
        .map(|chunk| {
            let values = chunk
                .iter()
                .map(|row| {
                    let literals = row.iter().map(sql_literal).collect::<Vec<_>>().join(", ");
                    format!("({literals})")
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "INSERT INTO {} ({column_list}) VALUES {values}",
                table.quoted()
            )
        })
        .collect()
}

fn object_id_sql(table: &TableRef) -> String {
    format!("OBJECT_ID({}, N'U')", quote_literal(&table.quoted()))
}

/// Writes `frame` into `table` on an open client.
///
/// Returns the number of rows inserted. With `echo` every statement is
/// logged at info level.
pub async fn write_frame(
    client: &dyn DatabaseClient,
    frame: &QueryResult,
    table: &TableRef,
    mode: LoadMode,
    echo: bool,
) -> Result<usize> {
    if frame.columns.is_empty() {
        return Err(HarvestError::data(format!(
            "Cannot load a frame with no columns into {}",
            table.display_name()
        )));
    }
    if frame.rows.iter().any(|row| row.len() != frame.columns.len()) {
        return Err(HarvestError::data(
            "Frame rows do not match its column count",
        ));
    }

    let exists_sql = format!(
        "SELECT CASE WHEN {} IS NULL THEN 0 ELSE 1 END AS table_exists",
        object_id_sql(table)
    );
    let exists = matches!(
        client.execute_query(&exists_sql).await?.rows.first().and_then(|r| r.first()),
        Some(Value::Int(1)) | Some(Value::Bool(true))
    );

    let mut statements = Vec::new();
    match (mode, exists) {
        (LoadMode::Fail, true) => {
            return Err(HarvestError::query(format!(
                "Table {} already exists",
                table.display_name()
            )));
        }
        (LoadMode::Replace, true) => {
            statements.push(format!("DROP TABLE {}", table.quoted()));
            statements.push(create_table_sql(frame, table)?);
        }
        (LoadMode::Append, true) => {}
        (_, false) => statements.push(create_table_sql(frame, table)?),
    }
    statements.extend(insert_sql(frame, table));

    run_in_transaction(client, &statements, echo).await?;

    info!(
        "Data successfully loaded to '{}' table ({} rows).",
        table.display_name(),
        frame.row_count
    );
    Ok(frame.rows.len())
}

async fn run_in_transaction(
    client: &dyn DatabaseClient,
    statements: &[String],
    echo: bool,
) -> Result<()> {
    client.execute("BEGIN TRANSACTION").await?;
    for sql in statements {
        if echo {
            info!("{sql}");
        } else {
            debug!("{sql}");
        }
        if let Err(e) = client.execute(sql).await {
            if let Err(rollback) = client.execute("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await {
                warn!("Rollback failed: {rollback}");
            }
            return Err(e);
        }
    }
    client.execute("COMMIT TRANSACTION").await
}
