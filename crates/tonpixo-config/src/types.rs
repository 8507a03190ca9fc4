//! Configuration types, defaults and clamps.
//!
//! ```toml
//! [gateway]
//! base_url = "https://mcp.example.com"
//! timeout_ms = 30000
//! retry_max = 2
//! cache_ttl_seconds = 900
//!
//! [agent]
//! prompt_mode = "lean"          # "lean" or "full"
//! recursion_limit = 15
//! require_schema_before_sql = true
//!
//! [history]
//! fetch_limit = 15
//! max_messages = 10
//!
//! [model]
//! model = "claude-haiku-4-5-20251001"
//! max_tokens = 2048
//!
//! [storage]
//! db_path = "/var/lib/tonpixo/tonpixo.db"
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// Every section has complete defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TonpixoConfig {
    pub gateway: GatewayConfig,
    pub agent: AgentConfig,
    pub history: HistoryConfig,
    pub model: ModelConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
}

impl TonpixoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string. Values are not clamped.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Clamp every numeric setting into its supported range.
    pub fn clamp(&mut self) {
        let g = &mut self.gateway;
        g.timeout_ms = g.timeout_ms.clamp(1_000, 300_000);
        g.retry_max = g.retry_max.min(10);

        let a = &mut self.agent;
        a.recursion_limit = a.recursion_limit.clamp(4, 40);
        a.question_max_chars = a.question_max_chars.clamp(200, 20_000);
        a.resource_max_chars = a.resource_max_chars.clamp(500, 50_000);

        let h = &mut self.history;
        h.fetch_limit = h.fetch_limit.min(50);
        h.max_messages = h.max_messages.min(40);
        h.max_chars = h.max_chars.clamp(500, 50_000);
        h.message_max_chars = h.message_max_chars.clamp(200, 12_000);

        self.model.max_tokens = self.model.max_tokens.clamp(128, 4096);
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Unparseable values leave the current setting untouched and are
    /// reported in the returned warnings.
    pub fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Vec<String> {
        let mut env = EnvReader {
            lookup,
            warnings: Vec::new(),
        };

        if let Some(v) = env.string("MCP_BASE_URL") {
            self.gateway.base_url = Some(v);
        }
        if let Some(v) = env.string("MCP_BEARER_TOKEN") {
            self.gateway.bearer_token = Some(v);
        }
        env.number("MCP_TIMEOUT_MS", &mut self.gateway.timeout_ms);
        env.number("MCP_RETRY_MAX", &mut self.gateway.retry_max);
        env.number("MCP_CACHE_TTL_SECONDS", &mut self.gateway.cache_ttl_seconds);

        if let Some(v) = env.string("AGENT_PROMPT_MODE") {
            self.agent.prompt_mode = PromptMode::from_setting(&v);
        }
        env.number("AGENT_RECURSION_LIMIT", &mut self.agent.recursion_limit);
        env.flag(
            "AGENT_REQUIRE_SCHEMA_BEFORE_SQL",
            &mut self.agent.require_schema_before_sql,
        );
        env.flag(
            "MCP_VALIDATE_TOOL_INVENTORY",
            &mut self.agent.validate_tool_inventory,
        );
        env.number("AGENT_QUESTION_MAX_CHARS", &mut self.agent.question_max_chars);
        env.number("AGENT_RESOURCE_MAX_CHARS", &mut self.agent.resource_max_chars);

        env.number("AGENT_HISTORY_FETCH_LIMIT", &mut self.history.fetch_limit);
        env.number("AGENT_HISTORY_MAX_MESSAGES", &mut self.history.max_messages);
        env.number("AGENT_HISTORY_MAX_CHARS", &mut self.history.max_chars);
        env.number("AGENT_MESSAGE_MAX_CHARS", &mut self.history.message_max_chars);

        if let Some(v) = env.string("TONPIXO_MODEL") {
            self.model.model = v;
        }
        env.number("AGENT_MODEL_MAX_TOKENS", &mut self.model.max_tokens);

        if let Some(v) = env.string("TONPIXO_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(v));
        }

        env.warnings
    }
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
    warnings: Vec<String>,
}

impl EnvReader<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn number<T: FromStr>(&mut self, key: &str, slot: &mut T) {
        if let Some(raw) = self.string(key) {
            match raw.parse() {
                Ok(v) => *slot = v,
                Err(_) => self
                    .warnings
                    .push(format!("{key}={raw} is not a valid integer; ignoring")),
            }
        }
    }

    fn flag(&mut self, key: &str, slot: &mut bool) {
        if let Some(raw) = self.string(key) {
            *slot = is_truthy(&raw);
        }
    }
}

/// `1`, `true`, `yes` and `on` (any case) are truthy; everything else is not.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings for the resource/tool capability service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Service base URL. Discovered from a sibling service checkout when unset.
    pub base_url: Option<String>,
    /// Bearer token sent with every request.
    pub bearer_token: Option<String>,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub retry_max: u32,
    /// Default cache TTL; 0 disables caching.
    pub cache_ttl_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            bearer_token: None,
            timeout_ms: 30_000,
            retry_max: 2,
            cache_ttl_seconds: 900,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where the system prompt template comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// Built-in compact template.
    #[default]
    Lean,
    /// Template fetched from the capability service.
    Full,
}

impl PromptMode {
    /// `full`, `mcp` and `mcp_full` select [`PromptMode::Full`]; anything else is lean.
    pub fn from_setting(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" | "mcp" | "mcp_full" => Self::Full,
            _ => Self::Lean,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lean => "lean",
            Self::Full => "full",
        }
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub prompt_mode: PromptMode,
    /// Maximum Reasoning + Acting steps per question.
    pub recursion_limit: u32,
    /// Refuse `sql_query` until a schema resource has been fetched.
    pub require_schema_before_sql: bool,
    /// Check the service's tool inventory at session setup.
    pub validate_tool_inventory: bool,
    pub question_max_chars: usize,
    /// Default budget for resource retrieval tools.
    pub resource_max_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            prompt_mode: PromptMode::Lean,
            recursion_limit: 15,
            require_schema_before_sql: true,
            validate_tool_inventory: false,
            question_max_chars: 8_000,
            resource_max_chars: 32_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// History Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Bounds applied to prior turns before they reach the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Turns fetched from storage; 0 disables history.
    pub fetch_limit: usize,
    /// Messages kept after trimming; 0 means no count cap.
    pub max_messages: usize,
    /// Aggregate character budget.
    pub max_chars: usize,
    /// Per-message character budget.
    pub message_max_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 15,
            max_messages: 10,
            max_chars: 24_000,
            message_max_chars: 8_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model / Storage / Telemetry
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";

/// Model invocation settings. The API key is read from the environment by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub max_tokens: u32,
    /// Override for the provider API base URL.
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. Defaults to `tonpixo.db` in the config directory.
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// When false, traces are not started and gateway events are not flushed.
    pub enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_empty_toml_is_defaults() {
        let config = TonpixoConfig::from_toml("").unwrap();
        assert_eq!(config, TonpixoConfig::default());
        assert_eq!(config.agent.recursion_limit, 15);
        assert!(config.agent.require_schema_before_sql);
        assert_eq!(config.history.max_chars, 24_000);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = TonpixoConfig::from_toml(
            r#"
[history]
max_messages = 4

[agent]
prompt_mode = "full"
"#,
        )
        .unwrap();
        assert_eq!(config.history.max_messages, 4);
        assert_eq!(config.history.fetch_limit, 15);
        assert_eq!(config.agent.prompt_mode, PromptMode::Full);
    }

    #[test]
    fn test_clamps() {
        let mut config = TonpixoConfig::default();
        config.agent.recursion_limit = 1;
        config.history.fetch_limit = 500;
        config.history.message_max_chars = 10;
        config.model.max_tokens = 100_000;
        config.agent.resource_max_chars = 1;
        config.clamp();

        assert_eq!(config.agent.recursion_limit, 4);
        assert_eq!(config.history.fetch_limit, 50);
        assert_eq!(config.history.message_max_chars, 200);
        assert_eq!(config.model.max_tokens, 4096);
        assert_eq!(config.agent.resource_max_chars, 500);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = TonpixoConfig::default();
        let warnings = config.apply_env(&lookup(&[
            ("MCP_BASE_URL", " mcp.local "),
            ("AGENT_RECURSION_LIMIT", "20"),
            ("AGENT_REQUIRE_SCHEMA_BEFORE_SQL", "off"),
            ("MCP_VALIDATE_TOOL_INVENTORY", "YES"),
            ("AGENT_PROMPT_MODE", "mcp_full"),
            ("TONPIXO_DB_PATH", "/tmp/t.db"),
        ]));

        assert!(warnings.is_empty());
        assert_eq!(config.gateway.base_url.as_deref(), Some("mcp.local"));
        assert_eq!(config.agent.recursion_limit, 20);
        assert!(!config.agent.require_schema_before_sql);
        assert!(config.agent.validate_tool_inventory);
        assert_eq!(config.agent.prompt_mode, PromptMode::Full);
        assert_eq!(config.storage.db_path, Some(PathBuf::from("/tmp/t.db")));
    }

    #[test]
    fn test_unparseable_integer_keeps_current_value() {
        let mut config = TonpixoConfig::default();
        let warnings = config.apply_env(&lookup(&[("AGENT_HISTORY_FETCH_LIMIT", "lots")]));
        assert_eq!(config.history.fetch_limit, 15);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("AGENT_HISTORY_FETCH_LIMIT"));
    }

    #[test]
    fn test_unparseable_integer_keeps_file_value_over_default() {
        let mut config: TonpixoConfig =
            toml::from_str("[history]\nfetch_limit = 30\n").unwrap();
        let warnings = config.apply_env(&lookup(&[("AGENT_HISTORY_FETCH_LIMIT", "lots")]));
        assert_eq!(config.history.fetch_limit, 30);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_prompt_mode_aliases() {
        assert_eq!(PromptMode::from_setting("FULL"), PromptMode::Full);
        assert_eq!(PromptMode::from_setting("mcp"), PromptMode::Full);
        assert_eq!(PromptMode::from_setting("verbose"), PromptMode::Lean);
        assert_eq!(PromptMode::from_setting(""), PromptMode::Lean);
    }

    #[test]
    fn test_truthy() {
        for v in ["1", "true", "Yes", " on "] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["0", "false", "no", "enabled"] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn test_toml_round_trip_preserves_values() {
        let mut config = TonpixoConfig::default();
        config.gateway.base_url = Some("https://mcp.example.com".into());
        let text = config.to_toml().unwrap();
        assert_eq!(TonpixoConfig::from_toml(&text).unwrap(), config);
    }
}
