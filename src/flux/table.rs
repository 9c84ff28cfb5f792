//! Result Tabulator
//!
//! Folds the heterogeneous record stream of a query result into one dense
//! table. Columns appear in first-seen order, bookkeeping labels are dropped,
//! and a cell that a record did not carry is an explicit [`Cell::Missing`].

use crate::client::{FluxTable, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Labels that never become preview columns (matched case-insensitively)
pub const EXCLUDED_LABELS: [&str; 4] = ["result", "table", "_start", "_stop"];

/// One cell of the preview
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// The record had no value for this column
    Missing,
    Value(Value),
}

impl Cell {
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Cell::Missing => None,
            Cell::Value(v) => Some(v),
        }
    }
}

/// Empty for missing cells, the value's text otherwise
impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Missing => Ok(()),
            Cell::Value(v) => v.fmt(f),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Missing => serializer.serialize_none(),
            Cell::Value(Value::String(s)) => serializer.serialize_str(s),
            Cell::Value(Value::Long(v)) => serializer.serialize_i64(*v),
            Cell::Value(Value::UnsignedLong(v)) => serializer.serialize_u64(*v),
            Cell::Value(Value::Double(v)) => serializer.serialize_f64(*v),
            Cell::Value(Value::Bool(v)) => serializer.serialize_bool(*v),
            Cell::Value(v @ Value::Time(_)) => serializer.serialize_str(&v.to_string()),
        }
    }
}

/// Dense row/column view of a query result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreviewTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl PreviewTable {
    /// Build a table from the backend's tables, preserving record order
    pub fn from_tables(tables: &[FluxTable]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut rows: Vec<Vec<Cell>> = Vec::new();

        for record in tables.iter().flat_map(|t| t.records.iter()) {
            let mut row = vec![Cell::Missing; columns.len()];

            for (label, value) in &record.values {
                if is_excluded(label) {
                    continue;
                }

                let idx = match index.get(label) {
                    Some(idx) => *idx,
                    None => {
                        columns.push(label.clone());
                        index.insert(label.clone(), columns.len() - 1);
                        row.push(Cell::Missing);
                        columns.len() - 1
                    }
                };

                if let Some(value) = value {
                    row[idx] = Cell::Value(value.clone());
                }
            }

            rows.push(row);
        }

        // Rows emitted before a column first appeared are padded out
        for row in &mut rows {
            row.resize(columns.len(), Cell::Missing);
        }

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell by row index and column name; `None` when either is out of range
    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

fn is_excluded(label: &str) -> bool {
    EXCLUDED_LABELS
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(label))
}
