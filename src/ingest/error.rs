//! Ingestion error types

use thiserror::Error;

/// Errors that can occur while reading an uploaded spreadsheet
#[derive(Debug, Error)]
pub enum ParseError {
    /// File extension is not one of xlsx/xls/csv
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    /// CSV library error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// ZIP container error (XLSX)
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// XML parsing error (XLSX)
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// IO error (XLS compound file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally invalid workbook
    #[error("Invalid workbook: {0}")]
    InvalidFormat(String),

    /// A required part is missing from the workbook
    #[error("Missing workbook part: {0}")]
    MissingPart(String),

    /// The sheet has no data rows below its header
    #[error("Spreadsheet contains no data rows")]
    Empty,

    /// Record-level decoding failure (XLS)
    #[error("Parse error: {0}")]
    Record(String),

    /// The parsing task could not complete
    #[error("Parser worker failed: {0}")]
    Worker(String),
}
