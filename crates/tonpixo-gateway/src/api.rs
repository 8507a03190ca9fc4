//! The gateway contract consumed by the agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::observer::SharedObserver;
use crate::resource::focus_and_truncate;
use crate::types::ChartRequest;

/// Typed access to the capability service.
///
/// `ttl` arguments override the client's default cache TTL for that call;
/// `Some(Duration::ZERO)` bypasses the cache.
#[async_trait]
pub trait ResourceGateway: Send + Sync {
    /// Fetch the system prompt template.
    async fn system_prompt_template(&self, ttl: Option<Duration>) -> Result<String>;

    /// List the tool names the service exposes.
    async fn list_tools(&self, ttl: Option<Duration>) -> Result<Vec<String>>;

    /// List the resource names the service exposes.
    async fn list_resources(&self, ttl: Option<Duration>) -> Result<Vec<String>>;

    /// Fetch a resource by (possibly aliased) name.
    async fn get_resource(&self, name: &str, ttl: Option<Duration>) -> Result<String>;

    /// Run a SQL query scoped to `job_id`.
    async fn sql_query(&self, query: &str, job_id: &str) -> Result<String>;

    /// Produce chart payload JSON.
    async fn generate_chart(&self, request: &ChartRequest) -> Result<String>;

    /// A handle sharing this gateway's caches that reports to `observer`.
    fn with_observer(&self, observer: SharedObserver) -> Arc<dyn ResourceGateway>;

    /// Fetch a resource, keep only the lines around `focus`, and truncate.
    async fn get_resource_limited(
        &self,
        name: &str,
        max_chars: usize,
        focus: Option<&str>,
    ) -> Result<String> {
        let content = self.get_resource(name, None).await?;
        Ok(focus_and_truncate(&content, max_chars, focus))
    }
}

/// A gateway that can be shared across tasks.
pub type SharedGateway = Arc<dyn ResourceGateway>;
