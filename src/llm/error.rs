//! Error classification and retry policy for LLM requests.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Broad category of an LLM request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Missing, invalid or unauthorized API key (401/403)
    Authentication,
    /// Provider throttled the request (429)
    RateLimited,
    /// Provider-side failure (5xx)
    ServerError,
    /// Request rejected by the provider (other 4xx)
    ClientError,
    /// Timeout, DNS or connection failure
    NetworkError,
    /// Response body could not be understood
    ParseError,
}

impl LlmErrorKind {
    /// Transient failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::NetworkError
        )
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authentication => "authentication error",
            Self::RateLimited => "rate limited",
            Self::ServerError => "server error",
            Self::ClientError => "client error",
            Self::NetworkError => "network error",
            Self::ParseError => "parse error",
        };
        f.write_str(s)
    }
}

/// An LLM request failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    /// Server-provided Retry-After, if any
    pub retry_after: Option<Duration>,
}

impl LlmError {
    fn new(kind: LlmErrorKind, message: String, status_code: Option<u16>) -> Self {
        Self {
            kind,
            message,
            status_code,
            retry_after: None,
        }
    }

    pub fn authentication(message: String, status_code: Option<u16>) -> Self {
        Self::new(LlmErrorKind::Authentication, message, status_code)
    }

    pub fn rate_limited(message: String, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(LlmErrorKind::RateLimited, message, Some(429))
        }
    }

    pub fn server_error(status_code: u16, message: String) -> Self {
        Self::new(LlmErrorKind::ServerError, message, Some(status_code))
    }

    pub fn client_error(status_code: u16, message: String) -> Self {
        Self::new(LlmErrorKind::ClientError, message, Some(status_code))
    }

    pub fn network_error(message: String) -> Self {
        Self::new(LlmErrorKind::NetworkError, message, None)
    }

    pub fn parse_error(message: String) -> Self {
        Self::new(LlmErrorKind::ParseError, message, None)
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        401 | 403 => LlmErrorKind::Authentication,
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

/// Retry policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Give up once this much time has passed since the first attempt
    pub max_retry_duration: Duration,
    /// Backoff before the first retry; doubles on each further retry
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(90),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(20),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, error: &LlmError) -> bool {
        error.kind.is_transient()
    }

    /// Delay before retry number `attempt` (0-based), honoring Retry-After.
    pub fn delay_for(&self, error: &LlmError, attempt: u32) -> Duration {
        if let Some(retry_after) = error.retry_after {
            return retry_after.min(self.max_backoff);
        }
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_status() {
        assert_eq!(classify_http_status(401), LlmErrorKind::Authentication);
        assert_eq!(classify_http_status(403), LlmErrorKind::Authentication);
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(400), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
    }

    #[test]
    fn test_only_transient_errors_retry() {
        let config = RetryConfig::default();
        assert!(config.should_retry(&LlmError::server_error(502, "bad gateway".into())));
        assert!(config.should_retry(&LlmError::network_error("timeout".into())));
        assert!(config.should_retry(&LlmError::rate_limited("slow down".into(), None)));
        assert!(!config.should_retry(&LlmError::authentication("no key".into(), None)));
        assert!(!config.should_retry(&LlmError::client_error(400, "bad".into())));
        assert!(!config.should_retry(&LlmError::parse_error("junk".into())));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            ..RetryConfig::default()
        };
        let err = LlmError::server_error(500, "boom".into());
        assert_eq!(config.delay_for(&err, 0), Duration::from_secs(1));
        assert_eq!(config.delay_for(&err, 2), Duration::from_secs(4));
        assert_eq!(config.delay_for(&err, 3), Duration::from_secs(5));

        let limited = LlmError::rate_limited("wait".into(), Some(Duration::from_secs(2)));
        assert_eq!(config.delay_for(&limited, 3), Duration::from_secs(2));
    }

    #[test]
    fn test_display_includes_kind() {
        let err = LlmError::client_error(400, "invalid schema".into());
        assert_eq!(err.to_string(), "client error: invalid schema");
    }
}
