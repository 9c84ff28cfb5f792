//! Preview export
//!
//! Writes a [`PreviewTable`] to a delimited text file (RFC 4180 quoting via the
//! `csv` crate) or to a single-sheet spreadsheet. Missing cells are written as
//! empty fields.

use crate::client::Value;
use crate::flux::{Cell, PreviewTable};
use chrono::{DateTime, TimeZone};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Worksheet name used when none is configured
pub const DEFAULT_SHEET_NAME: &str = "Data";

const MAX_EXACT_INTEGER: u64 = 1 << 53;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] XlsxError),

    #[error("Nothing to export: the preview has no rows")]
    EmptyTable,
}

/// Output file kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Delimited,
    Spreadsheet,
}

impl ExportKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportKind::Delimited => "csv",
            ExportKind::Spreadsheet => "xlsx",
        }
    }
}

/// `export_YYYYMMDD_HHMMSS.<ext>` for the given wall-clock time
pub fn default_export_file_name<Tz>(ext: &str, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    format!("export_{}.{}", now.format("%Y%m%d_%H%M%S"), ext)
}

/// Write a header row then one line per row
pub fn export_delimited(table: &PreviewTable, path: &Path) -> Result<(), ExportError> {
    if table.is_empty() {
        return Err(ExportError::EmptyTable);
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(Cell::to_string))?;
    }
    writer.flush()?;

    tracing::info!(path = %path.display(), rows = table.row_count(), "Exported delimited file");
    Ok(())
}

/// Write one worksheet with a bold header row and auto-fitted columns
pub fn export_spreadsheet(
    table: &PreviewTable,
    path: &Path,
    sheet_name: &str,
) -> Result<(), ExportError> {
    if table.is_empty() {
        return Err(ExportError::EmptyTable);
    }

    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(sheet_name)?;

    for (col, name) in table.columns().iter().enumerate() {
        sheet.write_string_with_format(0, column_index(col)?, name, &header)?;
    }

    for (r, row) in table.rows().iter().enumerate() {
        let r = row_index(r + 1)?;
        for (c, cell) in row.iter().enumerate() {
            let c = column_index(c)?;
            match cell {
                Cell::Missing => {}
                Cell::Value(Value::Long(v)) if fits_f64(v.unsigned_abs()) => {
                    sheet.write_number(r, c, *v as f64)?;
                }
                Cell::Value(Value::UnsignedLong(v)) if fits_f64(*v) => {
                    sheet.write_number(r, c, *v as f64)?;
                }
                Cell::Value(Value::Double(v)) => {
                    sheet.write_number(r, c, *v)?;
                }
                Cell::Value(Value::Bool(v)) => {
                    sheet.write_boolean(r, c, *v)?;
                }
                Cell::Value(v) => {
                    sheet.write_string(r, c, v.to_string())?;
                }
            }
        }
    }

    sheet.autofit();
    workbook.save(path)?;

    tracing::info!(path = %path.display(), rows = table.row_count(), sheet = %sheet_name, "Exported spreadsheet");
    Ok(())
}

/// Integers past 2^53 have no exact f64 and fall through to text
fn fits_f64(magnitude: u64) -> bool {
    magnitude <= MAX_EXACT_INTEGER
}

fn row_index(i: usize) -> Result<u32, XlsxError> {
    u32::try_from(i).map_err(|_| XlsxError::RowColumnLimitError)
}

fn column_index(i: usize) -> Result<u16, XlsxError> {
    u16::try_from(i).map_err(|_| XlsxError::RowColumnLimitError)
}
