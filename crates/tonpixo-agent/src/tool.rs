//! Tools the analyst model can call.
//!
//! This module defines the [`Tool`] trait implemented by every capability the
//! model can call, and the [`ToolRegistry`] the control loop dispatches
//! through.
//!
//! # Example
//!
//! ```rust,ignore
//! use tonpixo_agent::{Tool, ToolContext, ToolResult, ToolRegistry};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Tool for Echo {
//!     fn name(&self) -> &str { "echo" }
//!     fn description(&self) -> &str { "Repeats its input" }
//!     fn parameters(&self) -> Value { json!({"type": "object"}) }
//!
//!     async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
//!         Ok(ToolResult::text(params.to_string()))
//!     }
//! }
//!
//! let mut registry = ToolRegistry::with_declared(["echo"]);
//! registry.register(Echo)?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Parameter Validation
// ─────────────────────────────────────────────────────────────────────────────

/// A malformed tool call.
///
/// Messages are shown to the model, so they say what to send instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParameterValidationError {
    #[error("missing required parameter '{name}': {hint}")]
    MissingRequired {
        name: &'static str,
        hint: &'static str,
    },

    #[error("invalid type for '{name}': expected {expected}, got {actual}")]
    InvalidType {
        name: &'static str,
        expected: &'static str,
        actual: String,
    },

    #[error("'{name}' has invalid value: {message}")]
    InvalidValue {
        name: &'static str,
        message: String,
    },
}

impl ParameterValidationError {
    pub fn missing(name: &'static str, hint: &'static str) -> Self {
        Self::MissingRequired { name, hint }
    }

    pub fn invalid_type(name: &'static str, expected: &'static str, actual: &serde_json::Value) -> Self {
        Self::InvalidType {
            name,
            expected,
            actual: json_type_name(actual).to_string(),
        }
    }

    pub fn invalid_value(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            name,
            message: message.into(),
        }
    }
}

impl From<ParameterValidationError> for AgentError {
    fn from(err: ParameterValidationError) -> Self {
        AgentError::Tool(err.to_string())
    }
}

pub type ParamResult<T> = std::result::Result<T, ParameterValidationError>;

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Typed access to tool call arguments.
pub trait ParamExt {
    fn required_str(&self, name: &'static str, hint: &'static str) -> ParamResult<&str>;

    fn optional_str(&self, name: &str) -> Option<&str>;

    fn required_array(
        &self,
        name: &'static str,
        hint: &'static str,
    ) -> ParamResult<&Vec<serde_json::Value>>;

    /// Read an integer leniently: JSON integers, floats (truncated) and
    /// numeric strings all count. Anything else is `None`.
    fn lenient_i64(&self, name: &str) -> Option<i64>;
}

impl ParamExt for serde_json::Value {
    fn required_str(&self, name: &'static str, hint: &'static str) -> ParamResult<&str> {
        match self.get(name) {
            None | Some(serde_json::Value::Null) => Err(ParameterValidationError::missing(name, hint)),
            Some(value) => value
                .as_str()
                .ok_or_else(|| ParameterValidationError::invalid_type(name, "string", value)),
        }
    }

    fn optional_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_str())
    }

    fn required_array(
        &self,
        name: &'static str,
        hint: &'static str,
    ) -> ParamResult<&Vec<serde_json::Value>> {
        match self.get(name) {
            None | Some(serde_json::Value::Null) => Err(ParameterValidationError::missing(name, hint)),
            Some(value) => value
                .as_array()
                .ok_or_else(|| ParameterValidationError::invalid_type(name, "array", value)),
        }
    }

    fn lenient_i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A capability exposed to the model.
///
/// Each tool describes its input as a JSON Schema and executes asynchronously.
/// Expected failures (a gateway error, a refused query) are returned as
/// [`ToolResult`] text so the model can react; `Err` is reserved for
/// malformed calls.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by. Unique per registry.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the call arguments.
    fn parameters(&self) -> serde_json::Value;

    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Context
// ─────────────────────────────────────────────────────────────────────────────

/// Per-call execution context.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Job the invocation is scoped to.
    pub job_id: String,
    pub cancellation: CancellationToken,
    pub tool_call_id: Option<String>,
}

impl ToolContext {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            cancellation: CancellationToken::new(),
            tool_call_id: None,
        }
    }

    pub fn with_cancellation(job_id: impl Into<String>, cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..Self::new(job_id)
        }
    }

    /// Attach the originating tool call id.
    pub fn for_call(&self, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Result
// ─────────────────────────────────────────────────────────────────────────────

/// What a tool hands back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResult {
    /// Text output, including corrective and gateway-failure messages.
    Text { content: String },
    /// The call itself could not be carried out.
    Error { message: String },
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn is_success(&self) -> bool {
        !self.is_error()
    }

    /// Text placed in the `tool_result` block.
    pub fn to_llm_content(&self) -> String {
        match self {
            Self::Text { content } => content.clone(),
            Self::Error { message } => format!("Error: {}", message),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of the tools one invocation may call.
///
/// A registry built with [`ToolRegistry::with_declared`] only accepts the
/// declared names; registering anything else, or the same name twice, is a
/// configuration error.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, used for stable tool definitions.
    order: Vec<String>,
    declared: Option<HashSet<String>>,
}

impl ToolRegistry {
    /// An unrestricted registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry restricted to `names`.
    pub fn with_declared<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            declared: Some(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Register a tool.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();

        if let Some(declared) = &self.declared
            && !declared.contains(&name)
        {
            return Err(AgentError::config(format!(
                "tool '{}' is not in the declared tool set",
                name
            )));
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::config(format!("tool '{}' is registered twice", name)));
        }

        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Convert all tools to LLM tool definitions, in registration order.
    pub fn to_llm_definitions(&self) -> Vec<tonpixo_llm::ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                tonpixo_llm::ToolDefinition::new(tool.name(), tool.description(), tool.parameters())
            })
            .collect()
    }

    /// Dispatch a call. Unknown names are [`AgentError::ToolNotFound`].
    pub async fn execute(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        tool.execute(params, ctx).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test Double
// ─────────────────────────────────────────────────────────────────────────────

/// Returns a fixed response and records the parameters of every call.
#[cfg(test)]
#[derive(Debug)]
pub struct MockTool {
    name: String,
    response: ToolResult,
    calls: parking_lot::Mutex<Vec<serde_json::Value>>,
}

#[cfg(test)]
impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: ToolResult::text("mock output"),
            calls: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(mut self, response: ToolResult) -> Self {
        self.response = response;
        self
    }

    pub fn calls(&self) -> Vec<serde_json::Value> {
        self.calls.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A mock tool for testing"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, params: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        self.calls.lock().push(params);
        Ok(self.response.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_llm_content() {
        assert_eq!(ToolResult::text("42.5").to_llm_content(), "42.5");
        assert_eq!(
            ToolResult::error("tool 'x' is not available.").to_llm_content(),
            "Error: tool 'x' is not available."
        );
        assert!(ToolResult::error("x").is_error());
        assert!(ToolResult::text("x").is_success());
    }

    #[test]
    fn test_tool_result_serialization() {
        let json = serde_json::to_value(ToolResult::text("ok")).unwrap();
        assert_eq!(json, json!({"type": "text", "content": "ok"}));
    }

    #[test]
    fn test_registry_register_and_definitions_in_order() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("b_tool")).unwrap();
        registry.register(MockTool::new("a_tool")).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a_tool"));
        assert_eq!(registry.names(), vec!["b_tool", "a_tool"]);

        let defs = registry.to_llm_definitions();
        assert_eq!(defs[0].name, "b_tool");
        assert_eq!(defs[1].name, "a_tool");
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("sql_query")).unwrap();
        let err = registry.register(MockTool::new("sql_query")).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_registry_rejects_undeclared() {
        let mut registry = ToolRegistry::with_declared(["sql_query"]);
        registry.register(MockTool::new("sql_query")).unwrap();
        let err = registry.register(MockTool::new("shell")).unwrap_err();
        assert!(err.to_string().contains("shell"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_execute() {
        let mut registry = ToolRegistry::new();
        registry
            .register(MockTool::new("echo").with_response(ToolResult::text("hi")))
            .unwrap();

        let ctx = ToolContext::new("job-1");
        let result = registry.execute("echo", json!({}), &ctx).await.unwrap();
        assert_eq!(result.to_llm_content(), "hi");

        let missing = registry.execute("nope", json!({}), &ctx).await;
        assert!(matches!(missing, Err(AgentError::ToolNotFound(_))));
    }

    #[test]
    fn test_param_ext() {
        let params = json!({
            "query": "SELECT 1",
            "count": 7,
            "ratio": 3.9,
            "text_num": " 1200 ",
            "junk": "abc",
            "items": [1, 2],
        });

        assert_eq!(params.required_str("query", "hint").unwrap(), "SELECT 1");
        assert!(matches!(
            params.required_str("missing", "hint"),
            Err(ParameterValidationError::MissingRequired { .. })
        ));
        assert!(matches!(
            params.required_str("count", "hint"),
            Err(ParameterValidationError::InvalidType { .. })
        ));
        assert_eq!(params.optional_str("query"), Some("SELECT 1"));
        assert_eq!(params.required_array("items", "hint").unwrap().len(), 2);

        assert_eq!(params.lenient_i64("count"), Some(7));
        assert_eq!(params.lenient_i64("ratio"), Some(3));
        assert_eq!(params.lenient_i64("text_num"), Some(1200));
        assert_eq!(params.lenient_i64("junk"), None);
        assert_eq!(params.lenient_i64("missing"), None);
    }

    #[test]
    fn test_tool_context_for_call() {
        let ctx = ToolContext::new("job-1");
        let call = ctx.for_call("toolu_1");
        assert_eq!(call.job_id, "job-1");
        assert_eq!(call.tool_call_id.as_deref(), Some("toolu_1"));
        assert!(!call.is_cancelled());

        ctx.cancellation.cancel();
        assert!(call.is_cancelled());
    }
}
