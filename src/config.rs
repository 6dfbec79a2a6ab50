//! Configuration management.
//!
//! Configuration is read from environment variables:
//! - `GEMINI_API_KEY` - API key for the Gemini API (falls back to `API_KEY`).
//!   Optional at startup; without it every analysis fails with an
//!   authentication error.
//! - `HOST` - Optional. Bind address. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Listen port. Defaults to `3000`.
//! - `GEMINI_MODEL` - Optional. Defaults to `gemini-3-flash-preview`.
//! - `GEMINI_BASE_URL` - Optional. Defaults to the public v1beta endpoint.
//! - `MAX_ANALYZED_ROWS` - Optional. Rows forwarded per upload, at least 1. Defaults to `200`.
//! - `MAX_UPLOAD_BYTES` - Optional. Request body limit for uploads. Defaults to 20 MiB.
//! - `LLM_TIMEOUT_SECS` - Optional. Per-request timeout for the model call. Defaults to `120`.

use std::time::Duration;

use thiserror::Error;

use crate::extraction::DEFAULT_MAX_ROWS;
use crate::llm::DEFAULT_BASE_URL;

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub model: String,
    pub gemini_base_url: String,
    pub max_analyzed_rows: usize,
    pub max_upload_bytes: usize,
    pub llm_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            gemini_base_url: DEFAULT_BASE_URL.to_string(),
            max_analyzed_rows: DEFAULT_MAX_ROWS,
            max_upload_bytes: 20 * 1024 * 1024,
            llm_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = var("GEMINI_API_KEY").or_else(|| var("API_KEY"));

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse_var(&var, "PORT")?.unwrap_or(defaults.port),
            api_key,
            model: var("GEMINI_MODEL").unwrap_or(defaults.model),
            gemini_base_url: var("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            max_analyzed_rows: parse_positive(&var, "MAX_ANALYZED_ROWS")?
                .unwrap_or(defaults.max_analyzed_rows),
            max_upload_bytes: parse_var(&var, "MAX_UPLOAD_BYTES")?
                .unwrap_or(defaults.max_upload_bytes),
            llm_timeout: parse_var(&var, "LLM_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.llm_timeout),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse_var<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = var(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            name,
            value,
            reason: e.to_string(),
        })
}

fn parse_positive<F>(var: &F, name: &'static str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<usize, F>(var, name)? {
        Some(0) => Err(ConfigError::InvalidValue {
            name,
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        }),
        other => Ok(other),
    }
}
