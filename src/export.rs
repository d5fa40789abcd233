//! Spreadsheet export.
//!
//! `ReportWriter` collects frames as worksheets of one `.xlsx` workbook: a
//! bold header row, one row per record, and columns sized to their longest
//! value.

use crate::db::{QueryResult, Value};
use crate::error::{HarvestError, Result};
use regex::Regex;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Excel's sheet name length limit.
pub const MAX_SHEET_NAME: usize = 31;

/// Rows per worksheet, header included.
const MAX_ROWS: usize = 1_048_576;

/// Columns per worksheet.
const MAX_COLUMNS: usize = 16_384;

/// Characters per cell.
const MAX_CELL_CHARS: usize = 32_767;

/// Widest column Excel accepts.
const MAX_COLUMN_WIDTH: usize = 255;

/// Padding added to the widest value of each column.
const COLUMN_PADDING: usize = 2;

fn invalid_sheet_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\[\]:*?/\\]").expect("static regex"))
}

/// Makes `raw` a valid sheet name not yet in `taken` (case-insensitive).
pub fn sheet_name(raw: &str, taken: &[String]) -> String {
    let cleaned = invalid_sheet_chars().replace_all(raw, "");
    let cleaned = cleaned.trim().trim_matches('\'');
    let mut base: String = if cleaned.is_empty() {
        "Sheet".to_string()
    } else {
        let truncated: String = cleaned.chars().take(MAX_SHEET_NAME).collect();
        truncated.trim_end_matches('\'').to_string()
    };
    if base.eq_ignore_ascii_case("history") {
        base.push('_');
    }

    let is_taken = |name: &str| taken.iter().any(|t| t.eq_ignore_ascii_case(name));
    if !is_taken(&base) {
        return base;
    }

    (2..)
        .map(|n| {
            let suffix = format!("~{n}");
            let keep = MAX_SHEET_NAME - suffix.chars().count();
            let stem: String = base.chars().take(keep).collect();
            format!("{stem}{suffix}")
        })
        .find(|candidate| !is_taken(candidate))
        .unwrap_or(base)
}

/// Width for column `index`: the longest header or cell text, padded.
pub fn column_width(frame: &QueryResult, index: usize) -> usize {
    let header = frame
        .columns
        .get(index)
        .map(|c| c.name.chars().count())
        .unwrap_or(0);
    let longest = frame
        .column_values(index)
        .map(Value::cell_width)
        .max()
        .unwrap_or(0);
    (header.max(longest) + COLUMN_PADDING).min(MAX_COLUMN_WIDTH)
}

fn export_error(e: XlsxError) -> HarvestError {
    HarvestError::export(e.to_string())
}

/// One workbook being assembled in memory.
pub struct ReportWriter {
    workbook: Workbook,
    path: PathBuf,
    sheets: Vec<String>,
    header: Format,
    date: Format,
    datetime: Format,
}

impl ReportWriter {
    /// Starts a workbook that `save` will write to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            workbook: Workbook::new(),
            path: path.into(),
            sheets: Vec::new(),
            header: Format::new().set_bold(),
            date: Format::new().set_num_format("yyyy-mm-dd"),
            datetime: Format::new().set_num_format("yyyy-mm-dd hh:mm:ss.000"),
        }
    }

    /// Sheet names added so far, in order.
    pub fn sheet_names(&self) -> &[String] {
        &self.sheets
    }

    /// Adds `frame` as a new worksheet and returns the sheet name used.
    pub fn add_frame(&mut self, name: &str, frame: &QueryResult) -> Result<String> {
        if frame.rows.len() >= MAX_ROWS {
            return Err(HarvestError::export(format!(
                "{} rows do not fit on one worksheet",
                frame.rows.len()
            )));
        }
        if frame.columns.len() > MAX_COLUMNS {
            return Err(HarvestError::export(format!(
                "{} columns do not fit on one worksheet",
                frame.columns.len()
            )));
        }

        let sheet = sheet_name(name, &self.sheets);
        let mut worksheet = Worksheet::new();
        worksheet.set_name(&sheet).map_err(export_error)?;

        for (col, info) in frame.columns.iter().enumerate() {
            worksheet
                .write_string_with_format(0, col as u16, &info.name, &self.header)
                .map_err(export_error)?;
        }

        for (r, row) in frame.rows.iter().enumerate() {
            let excel_row = (r + 1) as u32;
            for (col, value) in row.iter().enumerate() {
                self.write_cell(&mut worksheet, excel_row, col as u16, value)?;
            }
        }

        for col in 0..frame.columns.len() {
            worksheet
                .set_column_width(col as u16, column_width(frame, col) as f64)
                .map_err(export_error)?;
        }

        self.workbook.push_worksheet(worksheet);
        debug!("Added sheet '{sheet}' with {} rows", frame.rows.len());
        self.sheets.push(sheet.clone());
        Ok(sheet)
    }

    fn write_cell(&self, ws: &mut Worksheet, row: u32, col: u16, value: &Value) -> Result<()> {
        match value {
            Value::Null => return Ok(()),
            Value::Bool(b) => ws.write_boolean(row, col, *b),
            Value::Int(i) => ws.write_number(row, col, *i as f64),
            Value::Float(f) if f.is_finite() => ws.write_number(row, col, *f),
            Value::Float(f) => ws.write_string(row, col, f.to_string()),
            Value::String(s) => {
                let text: String = s.chars().take(MAX_CELL_CHARS).collect();
                ws.write_string(row, col, text)
            }
            Value::Bytes(_) => ws.write_string(row, col, value.to_display_string()),
            Value::Date(d) => ws.write_datetime_with_format(row, col, d, &self.date),
            Value::DateTime(dt) => ws.write_datetime_with_format(row, col, dt, &self.datetime),
        }
        .map_err(export_error)?;
        Ok(())
    }

    /// Writes the workbook to disk.
    pub fn save(mut self) -> Result<PathBuf> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                HarvestError::export(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }
        self.workbook.save(&self.path).map_err(export_error)?;
        info!(
            "Saved {} ({} sheets)",
            self.path.display(),
            self.sheets.len()
        );
        Ok(self.path)
    }
}

/// Writes a single frame to a one-sheet workbook.
pub fn write_single(path: &Path, sheet: &str, frame: &QueryResult) -> Result<PathBuf> {
    let mut writer = ReportWriter::new(path);
    writer.add_frame(sheet, frame)?;
    writer.save()
}
