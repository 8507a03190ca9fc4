//! Errors raised while talking to a model provider.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider rejected or failed the request.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Transport failure, timeout or 5xx. Retried.
    #[error("Network error: {0}")]
    Network(String),

    /// Missing API key or unusable client settings.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP 429. Retried with backoff.
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// HTTP 401/403.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A streamed response ended inconsistently (bad delta, missing stop).
    #[error("Stream error: {0}")]
    Stream(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimit(_))
    }

    /// Classify a non-success HTTP status from the provider.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::Auth(message),
            429 => Self::RateLimit(message),
            500..=599 => Self::Network(format!("Server error ({status}): {message}")),
            _ => Self::Backend(message),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Self::Network(format!("{kind}: {err}"))
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
