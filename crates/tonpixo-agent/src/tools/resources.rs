//! On-demand resource retrieval.
//!
//! Schema, rules and tool descriptions are fetched lazily instead of being
//! preloaded into the prompt. A successful `schema/*` fetch satisfies the
//! schema-first guard.

use async_trait::async_trait;
use serde_json::{Value, json};
use tonpixo_gateway::SharedGateway;

use crate::error::Result;
use crate::guard::SchemaGuard;
use crate::tool::{ParamExt, Tool, ToolContext, ToolResult};

pub(super) const LIST_NAME: &str = "list_mcp_resources";
pub(super) const GET_NAME: &str = "get_mcp_resource";
pub(super) const GET_LIMITED_NAME: &str = "get_mcp_resource_limited";

// ─────────────────────────────────────────────────────────────────────────────
// Shared Fetcher
// ─────────────────────────────────────────────────────────────────────────────

/// Fetches, focuses and truncates resources, recording schema fetches.
#[derive(Clone)]
pub struct ResourceFetcher {
    gateway: SharedGateway,
    guard: SchemaGuard,
    default_max_chars: usize,
}

impl ResourceFetcher {
    pub fn new(gateway: SharedGateway, guard: SchemaGuard, default_max_chars: usize) -> Self {
        Self {
            gateway,
            guard,
            default_max_chars,
        }
    }

    /// Fetch `name`; failures come back as prefixed text.
    pub async fn fetch(&self, name: &str, max_chars: Option<usize>, focus: Option<&str>) -> String {
        if name.trim().is_empty() {
            return "Error fetching MCP resource: resource_name is required.".to_string();
        }

        let max_chars = max_chars.unwrap_or(self.default_max_chars);
        match self.gateway.get_resource_limited(name, max_chars, focus).await {
            Ok(content) => {
                self.guard.record_fetch(name);
                content
            }
            Err(e) => {
                tracing::warn!(resource = name, error = %e, "Resource fetch failed");
                format!("Error fetching MCP resource: {}", e)
            }
        }
    }
}

fn resource_name(params: &Value) -> &str {
    params.optional_str("resource_name").unwrap_or_default()
}

// ─────────────────────────────────────────────────────────────────────────────
// list_mcp_resources
// ─────────────────────────────────────────────────────────────────────────────

/// Lists resource names the service offers.
pub struct ListResourcesTool {
    gateway: SharedGateway,
}

impl ListResourcesTool {
    pub fn new(gateway: SharedGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for ListResourcesTool {
    fn name(&self) -> &str {
        LIST_NAME
    }

    fn description(&self) -> &str {
        "List MCP resources available for on-demand context retrieval."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let text = match self.gateway.list_resources(None).await {
            Ok(names) if names.is_empty() => "No MCP resources are currently available.".to_string(),
            Ok(names) => names.join("\n"),
            Err(e) => format!("Error listing MCP resources: {}", e),
        };
        Ok(ToolResult::text(text))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// get_mcp_resource
// ─────────────────────────────────────────────────────────────────────────────

/// Fetches one resource with the default budget and no focus.
pub struct GetResourceTool {
    fetcher: ResourceFetcher,
}

impl GetResourceTool {
    pub fn new(fetcher: ResourceFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for GetResourceTool {
    fn name(&self) -> &str {
        GET_NAME
    }

    fn description(&self) -> &str {
        "Fetch one MCP resource by name (for example `schema/transactions`), optionally focused and truncated."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resource_name": {"type": "string"}
            },
            "required": ["resource_name"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let text = self.fetcher.fetch(resource_name(&params), None, None).await;
        Ok(ToolResult::text(text))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// get_mcp_resource_limited
// ─────────────────────────────────────────────────────────────────────────────

/// Fetches one resource, optionally focused on a keyword and capped.
pub struct GetResourceLimitedTool {
    fetcher: ResourceFetcher,
}

impl GetResourceLimitedTool {
    pub fn new(fetcher: ResourceFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Tool for GetResourceLimitedTool {
    fn name(&self) -> &str {
        GET_LIMITED_NAME
    }

    fn description(&self) -> &str {
        "Fetch one MCP resource with optional `focus` keyword and `max_chars` cap."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resource_name": {"type": "string"},
                "max_chars": {"type": "integer"},
                "focus": {"type": "string", "default": ""}
            },
            "required": ["resource_name"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        // Negative budgets clamp up to the minimum downstream.
        let max_chars = params.lenient_i64("max_chars").map(|n| n.max(0) as usize);
        let focus = params.optional_str("focus");
        let text = self.fetcher.fetch(resource_name(&params), max_chars, focus).await;
        Ok(ToolResult::text(text))
    }
}
