//! Configuration for the Tonpixo analyst.
//!
//! Provides layered configuration with:
//! - TOML files (user config dir + project-local `tonpixo.toml`), merged key by key
//! - `.env.{profile}` / `.env.local` / `.env` loading that never overrides the process env
//! - Environment variable overrides (`MCP_*`, `AGENT_*`, `TONPIXO_*`)
//! - Range clamps applied after every layer
//! - Discovery of a sibling capability-service checkout for local development

pub mod discovery;
pub mod error;
pub mod gateway;
pub mod profile;
pub mod types;

pub use discovery::{
    ConfigSource, LoadOptions, LoadedConfig, config_dir, config_path, load_config,
    load_config_file, load_config_with_options,
};
pub use error::{ConfigError, Result};
pub use gateway::{DiscoveredGateway, discover_gateway};
pub use profile::{detect_git_branch, normalize_profile};
pub use types::{
    AgentConfig, DEFAULT_MODEL, GatewayConfig, HistoryConfig, ModelConfig, PromptMode,
    StorageConfig, TelemetryConfig, TonpixoConfig, is_truthy,
};
