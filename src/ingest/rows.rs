//! Grid to row-record conversion shared by every reader.
//!
//! The first row holding any value is the header row. Header cells become the
//! record keys: blank headers are named `__EMPTY`, `__EMPTY_1`, ... and repeated
//! headers get a `_1`, `_2`, ... suffix. Empty cells are left out of a record and
//! rows without any value are skipped.

use std::collections::HashSet;

use serde_json::Value;

use super::error::ParseError;
use super::RowRecord;

/// Largest sheet a workbook can describe (Excel 2007+, `XFD1048576`).
pub const MAX_SHEET_ROWS: usize = 1_048_576;
pub const MAX_SHEET_COLS: usize = 16_384;

/// Cell values laid out by (row, column). `Value::Null` marks an empty cell.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Grid {
    rows: Vec<Vec<Value>>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a value, growing the grid as needed. Null values are ignored.
    ///
    /// Positions beyond the largest possible sheet are rejected.
    pub fn set(&mut self, row: usize, col: usize, value: Value) -> Result<(), ParseError> {
        if row >= MAX_SHEET_ROWS || col >= MAX_SHEET_COLS {
            return Err(ParseError::InvalidFormat(format!(
                "cell at row {}, column {} is outside the sheet",
                row.saturating_add(1),
                col.saturating_add(1)
            )));
        }
        if value.is_null() {
            return Ok(());
        }
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize(col + 1, Value::Null);
        }
        cells[col] = value;
        Ok(())
    }

    /// Append a full row after the last one.
    pub fn push_row(&mut self, cells: Vec<Value>) {
        self.rows.push(cells);
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }
}

impl From<Vec<Vec<Value>>> for Grid {
    fn from(rows: Vec<Vec<Value>>) -> Self {
        Self { rows }
    }
}

/// Turn a grid into header-keyed records.
pub fn records_from_grid(grid: impl Into<Grid>) -> Vec<RowRecord> {
    let mut rows = grid
        .into()
        .into_rows()
        .into_iter()
        .filter(|cells| cells.iter().any(|v| !v.is_null()));

    let header_cells = match rows.next() {
        Some(cells) => cells,
        None => return Vec::new(),
    };
    let data: Vec<Vec<Value>> = rows.collect();

    let width = data
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(header_cells.len()))
        .max()
        .unwrap_or(0);
    let headers = header_names(&header_cells, width);

    data.into_iter()
        .map(|cells| {
            let mut record = RowRecord::new();
            for (col, value) in cells.into_iter().enumerate() {
                if !value.is_null() {
                    record.insert(headers[col].clone(), value);
                }
            }
            record
        })
        .collect()
}

fn header_names(cells: &[Value], width: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut blank_count = 0usize;
    let mut names = Vec::with_capacity(width);

    for col in 0..width {
        let base = match cells.get(col) {
            Some(Value::Null) | None => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(other) => Some(other.to_string()),
        };

        let name = match base {
            Some(base) => unique_name(&base, &mut seen),
            None => loop {
                let candidate = if blank_count == 0 {
                    "__EMPTY".to_string()
                } else {
                    format!("__EMPTY_{}", blank_count)
                };
                blank_count += 1;
                if seen.insert(candidate.clone()) {
                    break candidate;
                }
            },
        };
        names.push(name);
    }

    names
}

fn unique_name(base: &str, seen: &mut HashSet<String>) -> String {
    if seen.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}_{}", base, n);
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
