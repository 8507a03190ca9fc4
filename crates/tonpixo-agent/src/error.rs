//! Error types for the agent crate.

use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
///
/// Gateway failures inside tools never surface here; they are rendered as
/// tool text for the model. What remains is fatal for one invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    /// LLM backend error.
    #[error("LLM error: {0}")]
    Llm(#[from] tonpixo_llm::LlmError),

    /// Tool execution error.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Tool not found in registry.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Invalid tool registry or agent setup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The step budget ran out before the model produced an answer.
    #[error("Recursion limit of {0} reached without hitting a stop condition")]
    RecursionLimit(u32),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invocation was cancelled.
    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// Create a tool error.
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for [`AgentError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::tool("bad input");
        assert!(err.to_string().contains("Tool error"));
        assert!(err.to_string().contains("bad input"));
    }

    #[test]
    fn test_recursion_limit_names_the_limit() {
        let err = AgentError::RecursionLimit(15);
        assert!(err.to_string().contains("15"));
        assert!(!err.is_cancelled());
        assert!(AgentError::Cancelled.is_cancelled());
        assert_eq!(AgentError::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn test_llm_error_converts() {
        let err: AgentError = tonpixo_llm::LlmError::Backend("down".into()).into();
        assert!(matches!(err, AgentError::Llm(_)));
    }
}
