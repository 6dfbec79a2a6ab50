//! API request and response types.

use serde::Serialize;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
    /// False when no Gemini key is configured; uploads will fail analysis
    pub api_key_configured: bool,
}

/// Result of a mark-sent intent.
#[derive(Debug, Clone, Serialize)]
pub struct SentResponse {
    pub assignee: String,
    /// False if the name was already sent, unknown, or not under review
    pub recorded: bool,
    pub fully_dispatched: bool,
}
