//! LLM client module for structured (JSON) generation.
//!
//! This module provides a trait-based abstraction over LLM providers,
//! with Google Gemini as the primary implementation.
//!
//! Callers pass a prompt and a response schema; the provider is asked to
//! answer with JSON conforming to that schema.

mod error;
mod gemini;

pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use gemini::{GeminiClient, DEFAULT_BASE_URL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Response from a structured generation request.
#[derive(Debug, Clone)]
pub struct StructuredResponse {
    /// Raw response text (expected to be JSON)
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

/// Token usage information (if provided by the upstream provider).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Trait for LLM clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Ask `model` to answer `prompt` with JSON matching `schema`.
    async fn generate_json(
        &self,
        model: &str,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<StructuredResponse, LlmError>;
}
