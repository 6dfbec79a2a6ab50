//! Spreadsheet ingestion - turns an uploaded work plan into header-keyed row records.
//!
//! Supported inputs are picked by file extension (case-insensitive):
//! - `.csv`  - comma separated text, first non-empty line is the header
//! - `.xlsx` - Office Open XML workbook, first worksheet
//! - `.xls`  - BIFF8 workbook inside a compound file, first worksheet
//!
//! Every format is reduced to a grid of JSON cell values, and the grid is turned
//! into records the same way for all of them (see [`rows`]).

mod dates;
mod delimited;
mod error;
mod rows;
mod xls;
mod xlsx;

pub use error::ParseError;
pub use rows::records_from_grid;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};

/// One parsed spreadsheet row: column header to cell value.
pub type RowRecord = Map<String, Value>;

/// An uploaded file as received from the user.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub contents: Bytes,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }

    pub fn format(&self) -> Option<SpreadsheetFormat> {
        SpreadsheetFormat::from_file_name(&self.name)
    }
}

/// Spreadsheet formats the ingestor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetFormat {
    Csv,
    Xlsx,
    Xls,
}

impl SpreadsheetFormat {
    pub const EXTENSIONS: [&'static str; 3] = ["xlsx", "xls", "csv"];

    /// Recognize a format from the extension of `name`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            _ => None,
        }
    }

    /// Parse raw file bytes into row records.
    pub fn parse(&self, data: &[u8]) -> Result<Vec<RowRecord>, ParseError> {
        let grid = match self {
            Self::Csv => delimited::read_grid(data)?,
            Self::Xlsx => xlsx::read_grid(data)?,
            Self::Xls => xls::read_grid(data)?,
        };
        let records = records_from_grid(grid);
        if records.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(records)
    }
}

impl std::fmt::Display for SpreadsheetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Xlsx => write!(f, "xlsx"),
            Self::Xls => write!(f, "xls"),
        }
    }
}

/// Converts an uploaded file into an ordered sequence of row records.
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn parse(&self, file: &UploadedFile) -> Result<Vec<RowRecord>, ParseError>;
}

/// Default ingestor backed by the built-in CSV/XLSX/XLS readers.
///
/// Parsing is CPU-bound, so it runs on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct SpreadsheetIngestor;

impl SpreadsheetIngestor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Ingestor for SpreadsheetIngestor {
    async fn parse(&self, file: &UploadedFile) -> Result<Vec<RowRecord>, ParseError> {
        let format = file
            .format()
            .ok_or_else(|| ParseError::UnsupportedFormat(file.name.clone()))?;
        let contents = file.contents.clone();
        let name = file.name.clone();

        let records = tokio::task::spawn_blocking(move || format.parse(&contents))
            .await
            .map_err(|e| ParseError::Worker(e.to_string()))??;

        tracing::info!(
            "Parsed {} rows from {} ({})",
            records.len(),
            name,
            format
        );
        Ok(records)
    }
}
