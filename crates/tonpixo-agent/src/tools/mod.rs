//! Tools exposed to the model.
//!
//! Every tool is a thin wrapper over the [`ResourceGateway`]; gateway failures
//! become prefixed text results so the model can recover. One registry is
//! built per invocation, bound to that invocation's [`SchemaGuard`].
//!
//! [`ResourceGateway`]: tonpixo_gateway::ResourceGateway

mod chart;
mod resources;
mod sql;

pub use chart::ChartTool;
pub use resources::{GetResourceLimitedTool, GetResourceTool, ListResourcesTool, ResourceFetcher};
pub use sql::SqlQueryTool;

use tonpixo_gateway::SharedGateway;

use crate::error::Result;
use crate::guard::SchemaGuard;
use crate::tool::ToolRegistry;

/// Names of every tool the analyst may register.
pub const ANALYST_TOOL_NAMES: &[&str] = &[
    sql::NAME,
    chart::NAME,
    resources::LIST_NAME,
    resources::GET_NAME,
    resources::GET_LIMITED_NAME,
];

/// Tools the capability service must expose for the analyst to work.
pub const REQUIRED_SERVICE_TOOLS: &[&str] = &[sql::NAME, chart::NAME];

/// Build the per-invocation tool registry.
pub fn analyst_tools(
    gateway: SharedGateway,
    guard: SchemaGuard,
    resource_max_chars: usize,
) -> Result<ToolRegistry> {
    let fetcher = ResourceFetcher::new(gateway.clone(), guard.clone(), resource_max_chars);

    let mut registry = ToolRegistry::with_declared(ANALYST_TOOL_NAMES.iter().copied());
    registry.register(SqlQueryTool::new(gateway.clone(), guard))?;
    registry.register(ChartTool::new(gateway.clone()))?;
    registry.register(ListResourcesTool::new(gateway))?;
    registry.register(GetResourceTool::new(fetcher.clone()))?;
    registry.register(GetResourceLimitedTool::new(fetcher))?;
    Ok(registry)
}
