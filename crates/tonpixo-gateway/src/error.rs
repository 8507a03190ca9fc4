//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
///
/// Messages are phrased for the model: tool wrappers embed them verbatim in
/// `"Error ...: {e}"` results.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No base URL was configured.
    #[error("MCP_BASE_URL is not configured.")]
    NotConfigured,

    /// Base URL could not be parsed.
    #[error("Invalid MCP base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid client configuration (e.g. a token that is not a valid header).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The service answered with a non-2xx status.
    #[error("MCP request failed (status={status}, path={path})")]
    Api { status: u16, path: String },

    /// The service answered 2xx but the body was not JSON.
    #[error("MCP returned non-JSON response (status={status}, path={path})")]
    NonJson { status: u16, path: String },

    /// Transport failures (connect, timeout, body read) on every attempt.
    #[error("MCP request error for {path}")]
    Exhausted {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// JSON body did not have the expected shape.
    #[error("{0}")]
    InvalidResponse(String),

    /// The system prompt resource was blank.
    #[error("MCP system prompt resource is empty.")]
    EmptySystemPrompt,

    /// A resource came back blank.
    #[error("MCP resource '{0}' is empty.")]
    EmptyResource(String),

    /// Resource name was blank.
    #[error("MCP resource name is required.")]
    MissingResourceName,

    /// Resource name did not match any accepted shape.
    #[error("Unsupported MCP resource name: {0}")]
    UnsupportedResource(String),

    /// Building the HTTP client failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    /// Create an invalid response error.
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::NonJson { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(s) if s >= 500)
    }

    /// Short, stable classifier used in `http_exception` events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured | Self::InvalidUrl(_) | Self::Config(_) => "config",
            Self::Api { .. } => "http_status",
            Self::NonJson { .. } => "non_json",
            Self::Exhausted { source, .. } if source.is_timeout() => "timeout",
            Self::Exhausted { source, .. } if source.is_connect() => "connect",
            Self::Exhausted { .. } | Self::Http(_) => "transport",
            Self::InvalidResponse(_) | Self::EmptySystemPrompt | Self::EmptyResource(_) => {
                "invalid_response"
            }
            Self::MissingResourceName | Self::UnsupportedResource(_) => "resource_name",
        }
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
