//! Extraction error types

use thiserror::Error;

use crate::llm::{LlmError, LlmErrorKind};

/// Errors from the remote task-extraction call
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    /// Credential missing or rejected
    #[error("Authentication with the AI service failed: {0}")]
    Authentication(String),

    /// The service could not be reached
    #[error("Could not reach the AI service: {0}")]
    Network(String),

    /// The service rejected or failed the request
    #[error("The AI service rejected the request: {0}")]
    Upstream(String),

    /// The service answered without usable content
    #[error("The AI service returned no usable content: {0}")]
    MalformedResponse(String),

    /// The content did not have the expected structure
    #[error("Unexpected response structure at {path}: {message}")]
    Schema { path: String, message: String },
}

impl AnalysisError {
    pub(crate) fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<LlmError> for AnalysisError {
    fn from(err: LlmError) -> Self {
        match err.kind {
            LlmErrorKind::Authentication => Self::Authentication(err.message),
            LlmErrorKind::NetworkError => Self::Network(err.message),
            LlmErrorKind::ParseError => Self::MalformedResponse(err.message),
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::ClientError => {
                Self::Upstream(err.to_string())
            }
        }
    }
}
