//! Session error types

use serde::Serialize;
use thiserror::Error;

use super::state::Phase;
use crate::extraction::AnalysisError;
use crate::ingest::ParseError;

const INVALID_FILE_MESSAGE: &str = "Please upload a valid Excel or CSV file.";
const PROCESSING_FAILED_MESSAGE: &str =
    "Failed to process file. Make sure it has task dates and assignees.";

/// Why an intent was refused or a cycle failed
#[derive(Debug, Error)]
pub enum SessionError {
    /// File type is not xlsx/xls/csv
    #[error("Unsupported file: {0}")]
    Validation(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Intent not accepted in the current phase; nothing changed
    #[error("Session is busy ({0})")]
    Busy(Phase),

    /// The cycle's task stopped before producing an outcome
    #[error("Upload processing stopped unexpectedly: {0}")]
    Interrupted(String),

    /// The session was reset while this cycle was in flight
    #[error("Upload was cancelled by a reset")]
    Superseded,
}

/// Failure category shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Parse,
    Analysis,
}

/// The error currently surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// User-facing text
    pub message: String,
    /// Underlying cause
    pub detail: String,
}

impl SessionError {
    /// The surfaced form of this error; `None` for refusals that change nothing.
    pub fn info(&self) -> Option<ErrorInfo> {
        let (kind, message) = match self {
            Self::Validation(_) => (ErrorKind::Validation, INVALID_FILE_MESSAGE),
            Self::Parse(_) => (ErrorKind::Parse, PROCESSING_FAILED_MESSAGE),
            Self::Analysis(_) | Self::Interrupted(_) => {
                (ErrorKind::Analysis, PROCESSING_FAILED_MESSAGE)
            }
            Self::Busy(_) | Self::Superseded => return None,
        };
        Some(ErrorInfo {
            kind,
            message: message.to_string(),
            detail: self.to_string(),
        })
    }
}
