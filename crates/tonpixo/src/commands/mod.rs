//! CLI command handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tonpixo_agent::{AnalystService, NoopTelemetry, ServiceSettings, SharedTelemetry, TracingTelemetry};
use tonpixo_config::LoadedConfig;
use tonpixo_gateway::{GatewayClient, GatewayError};
use tonpixo_llm::{AnthropicBackend, AnthropicConfig};
use tonpixo_store::SqliteStore;

pub mod ask;
pub mod chats;
pub mod config;
pub mod history;
pub mod resources;
pub mod tools;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Layered configuration for this run.
    pub loaded: LoadedConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Wrap a gateway failure with the last upstream response the client saw.
pub fn upstream_failure(gateway: &GatewayClient, error: GatewayError) -> anyhow::Error {
    match gateway.last_upstream_error() {
        Some(detail) => anyhow::Error::new(error)
            .context(format!("Capability service request failed ({detail})")),
        None => error.into(),
    }
}

impl Context {
    /// Gateway client built from `[gateway]`.
    pub fn gateway(&self) -> Result<GatewayClient> {
        let gateway = &self.loaded.config.gateway;
        let mut builder = GatewayClient::builder()
            .base_url(gateway.base_url.clone().unwrap_or_default())
            .timeout(Duration::from_millis(gateway.timeout_ms))
            .retry_max(gateway.retry_max)
            .cache_ttl(Duration::from_secs(gateway.cache_ttl_seconds));
        if let Some(token) = &gateway.bearer_token {
            builder = builder.bearer_token(token);
        }
        builder.build().context("Failed to build capability service client")
    }

    /// Open the SQLite store, creating its directory if needed.
    pub fn store(&self) -> Result<Arc<SqliteStore>> {
        let path = self.loaded.db_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let store = SqliteStore::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Arc::new(store))
    }

    /// The analyst service wired to the real backend, gateway and store.
    pub fn service(&self) -> Result<(AnalystService, Arc<SqliteStore>)> {
        let config = &self.loaded.config;

        let mut llm = AnthropicConfig::from_env()?;
        if let Some(url) = &config.model.base_url {
            llm = llm.with_base_url(url);
        }
        let backend = Arc::new(AnthropicBackend::new(llm)?);
        let gateway = Arc::new(self.gateway()?);
        let store = self.store()?;

        let telemetry: SharedTelemetry = if config.telemetry.enabled {
            Arc::new(TracingTelemetry)
        } else {
            Arc::new(NoopTelemetry)
        };

        let service = AnalystService::new(backend, gateway, ServiceSettings::from(config))
            .with_turn_store(store.clone())
            .with_job_directory(store.clone())
            .with_telemetry(telemetry);
        Ok((service, store))
    }

    /// Print `value` as pretty JSON.
    pub fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}
