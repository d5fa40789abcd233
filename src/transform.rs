//! Light frame transformations applied between extraction and load.

use crate::db::{QueryResult, Value};
use crate::error::{HarvestError, Result};
use chrono::{NaiveDate, NaiveDateTime};

/// Layout SQL Server accepts for DATETIME/DATETIME2 literals, to the millisecond.
pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const DATETIME_INPUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_INPUTS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

/// Rewrites a date column as `YYYY-MM-DD HH:MM:SS.mmm` text.
///
/// Dates get a midnight time; sub-millisecond digits are dropped. NULLs stay
/// NULL. Fails on an unknown column or on text that is not a date.
pub fn format_sql_datetime(frame: &mut QueryResult, column: &str) -> Result<()> {
    let index = frame
        .column_index(column)
        .ok_or_else(|| HarvestError::data(format!("Column '{column}' not found")))?;

    for (row_number, row) in frame.rows.iter_mut().enumerate() {
        let Some(value) = row.get_mut(index) else {
            continue;
        };
        let parsed = match &*value {
            Value::Null => continue,
            Value::DateTime(dt) => *dt,
            Value::Date(d) => d.and_time(chrono::NaiveTime::MIN),
            Value::String(s) => parse_datetime(s).ok_or_else(|| {
                HarvestError::data(format!(
                    "Row {}: '{s}' in column '{column}' is not a date",
                    row_number + 1
                ))
            })?,
            other => {
                return Err(HarvestError::data(format!(
                    "Row {}: {other} in column '{column}' is not a date",
                    row_number + 1
                )))
            }
        };
        *value = Value::String(parsed.format(SQL_DATETIME_FORMAT).to_string());
    }

    if let Some(info) = frame.columns.get_mut(index) {
        info.data_type = "datetime_text".to_string();
    }
    Ok(())
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATETIME_INPUTS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATE_INPUTS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
}
