//! Scoped SQL execution.

use async_trait::async_trait;
use serde_json::{Value, json};
use tonpixo_gateway::SharedGateway;

use crate::error::Result;
use crate::guard::SchemaGuard;
use crate::tool::{ParamExt, Tool, ToolContext, ToolResult};

pub(super) const NAME: &str = "sql_query";

/// Runs read-only SQL against the invocation's job dataset.
pub struct SqlQueryTool {
    gateway: SharedGateway,
    guard: SchemaGuard,
}

impl SqlQueryTool {
    pub fn new(gateway: SharedGateway, guard: SchemaGuard) -> Self {
        Self { gateway, guard }
    }
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Execute a scoped SQL query via remote MCP tool server."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Read-only SQL. Must filter on the current job_id."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let query = params.required_str("query", "provide the SQL query to run")?;

        if let Some(refusal) = self.guard.check_sql() {
            tracing::info!(job_id = %ctx.job_id, "SQL refused until schema is fetched");
            return Ok(ToolResult::text(refusal));
        }

        match self.gateway.sql_query(query, &ctx.job_id).await {
            Ok(result) => Ok(ToolResult::text(result)),
            Err(e) => {
                tracing::warn!(job_id = %ctx.job_id, error = %e, "SQL query failed");
                Ok(ToolResult::text(format!("Error executing query via MCP: {}", e)))
            }
        }
    }
}
