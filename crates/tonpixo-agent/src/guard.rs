//! Schema-first guardrail.
//!
//! Blocks `sql_query` until at least one `schema/*` resource has been fetched
//! in the current invocation. The model gets a corrective message, not an
//! error, so it can fetch the schema and retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tonpixo_gateway::is_schema_resource;

/// Tool result returned when SQL is attempted before any schema fetch.
pub const SCHEMA_REQUIRED_MESSAGE: &str = "Schema is required before SQL execution. \
First call `get_mcp_resource_limited` with one or more schema resources, \
for example `schema/transactions`.";

/// Per-invocation schema-first gate.
///
/// Cloning shares the flag, so the SQL tool and the resource tools of one
/// invocation observe the same state.
#[derive(Debug, Clone)]
pub struct SchemaGuard {
    enabled: bool,
    schema_loaded: Arc<AtomicBool>,
}

impl SchemaGuard {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            schema_loaded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn schema_loaded(&self) -> bool {
        self.schema_loaded.load(Ordering::Acquire)
    }

    /// Record a successful fetch of `resource_name`.
    pub fn record_fetch(&self, resource_name: &str) {
        if is_schema_resource(resource_name) && !self.schema_loaded.swap(true, Ordering::AcqRel) {
            tracing::debug!(resource = resource_name, "Schema guard satisfied");
        }
    }

    /// The refusal to return instead of running SQL, if any. Side-effect free.
    pub fn check_sql(&self) -> Option<&'static str> {
        (self.enabled && !self.schema_loaded()).then_some(SCHEMA_REQUIRED_MESSAGE)
    }
}
