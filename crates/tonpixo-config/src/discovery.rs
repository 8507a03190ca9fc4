//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. Built-in defaults
//! 2. `~/.config/tonpixo/config.toml` (user config, or `$TONPIXO_CONFIG_DIR/config.toml`)
//! 3. `./tonpixo.toml` (project-local)
//! 4. `.env.{profile}`, `.env.local`, `.env` (never override the process environment)
//! 5. Environment variables
//! 6. Gateway discovery for a still-missing base URL or token
//!
//! TOML layers are merged key by key, so a project file that sets only
//! `[history] max_messages` keeps every other user setting.

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::gateway::{DiscoveredGateway, discover_gateway};
use crate::profile::{env_file_profile, load_env_files};
use crate::types::TonpixoConfig;

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "tonpixo.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for platform directory resolution.
const APP_NAME: &str = "tonpixo";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "TONPIXO_CONFIG_DIR";

/// Default database filename inside the config directory.
const DB_FILE: &str = "tonpixo.db";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged, clamped configuration.
    pub config: TonpixoConfig,
    /// TOML sources that were checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// `.env` files that were loaded.
    pub env_files: Vec<PathBuf>,
    /// Sibling service settings, when discovery filled anything in.
    pub discovered: Option<DiscoveredGateway>,
    /// User config directory used for this load.
    pub config_dir: Option<PathBuf>,
    /// Non-fatal problems (malformed layers, unparseable env values).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of TOML sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }

    /// Database path: configured, else `tonpixo.db` in the config directory.
    pub fn db_path(&self) -> PathBuf {
        if let Some(path) = &self.config.storage.db_path {
            return path.clone();
        }
        self.config_dir
            .as_ref()
            .map(|d| d.join(DB_FILE))
            .unwrap_or_else(|| PathBuf::from(DB_FILE))
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.config_dir
            .as_ref()
            .map(|d| d.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"))
    }
}

/// Knobs for [`load_config_with_options`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Directory holding `tonpixo.toml`, `.env*` files and the git checkout. Defaults to cwd.
    pub project_dir: Option<PathBuf>,
    /// Overrides `TONPIXO_CONFIG_DIR` and the platform default.
    pub config_dir: Option<PathBuf>,
    /// Skip `.env` loading.
    pub skip_env_files: bool,
    /// Skip sibling gateway discovery.
    pub skip_discovery: bool,
}

/// Load configuration from every layer using process environment variables.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(&LoadOptions {
        project_dir: project_dir.map(Path::to_path_buf),
        ..LoadOptions::default()
    })
}

/// Load configuration with explicit control over directories and layers.
pub fn load_config_with_options(options: &LoadOptions) -> Result<LoadedConfig> {
    let lookup = |key: &str| std::env::var(key).ok();
    let project_dir = match &options.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    let mut warnings = Vec::new();
    let mut sources = Vec::new();
    let mut merged = toml::Table::new();

    // 1. User config: explicit override, then env var, then platform default
    let config_dir = options.config_dir.clone().or_else(config_dir);
    if let Some(dir) = &config_dir {
        sources.push(load_layer(&mut merged, &dir.join(USER_CONFIG_FILE), &mut warnings));
    }

    // 2. Project-local config
    sources.push(load_layer(
        &mut merged,
        &project_dir.join(PROJECT_CONFIG_FILE),
        &mut warnings,
    ));

    let mut config: TonpixoConfig = toml::Value::Table(merged).try_into()?;

    // 3. .env files, then environment overrides
    let env_files = if options.skip_env_files {
        Vec::new()
    } else {
        let profile = env_file_profile(&lookup, &project_dir);
        load_env_files(&project_dir, profile.as_deref())?
    };
    warnings.extend(config.apply_env(&lookup));

    // 4. Discovery only fills gaps
    let discovered = if options.skip_discovery {
        None
    } else {
        fill_from_discovery(&mut config, &lookup, &project_dir)
    };

    config.clamp();

    Ok(LoadedConfig {
        config,
        sources,
        env_files,
        discovered,
        config_dir,
        warnings,
    })
}

fn fill_from_discovery(
    config: &mut TonpixoConfig,
    lookup: &dyn Fn(&str) -> Option<String>,
    project_dir: &Path,
) -> Option<DiscoveredGateway> {
    let gateway = &mut config.gateway;
    let missing_url = gateway.base_url.as_deref().is_none_or(|u| u.trim().is_empty());
    let missing_token = gateway
        .bearer_token
        .as_deref()
        .is_none_or(|t| t.trim().is_empty());
    if !missing_url && !missing_token {
        return None;
    }

    let found = discover_gateway(lookup, project_dir)?;
    let mut used = false;
    if missing_url {
        gateway.base_url = Some(found.base_url.clone());
        used = true;
    }
    if missing_token && let Some(token) = &found.bearer_token {
        gateway.bearer_token = Some(token.clone());
        used = true;
    }
    used.then_some(found)
}

/// Load config from a specific file path (no discovery, no clamping).
pub fn load_config_file(path: &Path) -> Result<TonpixoConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    TonpixoConfig::from_toml(&contents)
}

/// User config file path.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// User config directory.
///
/// Checks `TONPIXO_CONFIG_DIR` first, then falls back to the platform default
/// (`~/.config/tonpixo` on Linux, `~/Library/Application Support/tonpixo` on macOS).
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Try to read a TOML layer and merge it into `merged`.
fn load_layer(merged: &mut toml::Table, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    let missing = ConfigSource {
        path: path.to_path_buf(),
        loaded: false,
    };
    if !path.is_file() {
        return missing;
    }

    let parsed = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })
        .and_then(|text| Ok(text.parse::<toml::Table>()?));

    match parsed {
        Ok(layer) => {
            merge_tables(merged, layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            missing
        }
    }
}

/// Deep-merge `overlay` into `base`; overlay wins on conflicts.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;

    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;
    use crate::PromptMode;

    const ENV_KEYS: &[&str] = &[
        "MCP_BASE_URL",
        "MCP_BEARER_TOKEN",
        "AGENT_RECURSION_LIMIT",
        "AGENT_HISTORY_MAX_MESSAGES",
        "TONPIXO_DB_PATH",
        "TONPIXO_ENV",
        "APP_ENV",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    fn options(project: &TempDir, config: &TempDir) -> LoadOptions {
        LoadOptions {
            project_dir: Some(project.path().to_path_buf()),
            config_dir: Some(config.path().to_path_buf()),
            skip_env_files: false,
            skip_discovery: true,
        }
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/tonpixo.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tonpixo.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base: toml::Table = "[history]\nfetch_limit = 5\nmax_messages = 3\n".parse().unwrap();
        let overlay: toml::Table = "[history]\nmax_messages = 7\n".parse().unwrap();
        merge_tables(&mut base, overlay);

        let history = base["history"].as_table().unwrap();
        assert_eq!(history["fetch_limit"].as_integer(), Some(5));
        assert_eq!(history["max_messages"].as_integer(), Some(7));
    }

    #[test]
    #[serial]
    fn test_layers_env_and_clamp() {
        clear_env();
        let project = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();

        fs::write(
            config_dir.path().join("config.toml"),
            "[agent]\nprompt_mode = \"full\"\nrecursion_limit = 30\n\n[history]\nfetch_limit = 5\n",
        )
        .unwrap();
        fs::write(
            project.path().join("tonpixo.toml"),
            "[history]\nmax_messages = 2\n\n[model]\nmax_tokens = 1\n",
        )
        .unwrap();
        unsafe { std::env::set_var("AGENT_RECURSION_LIMIT", "99") };

        let loaded = load_config_with_options(&options(&project, &config_dir)).unwrap();
        let config = &loaded.config;

        assert_eq!(config.agent.prompt_mode, PromptMode::Full);
        assert_eq!(config.history.fetch_limit, 5);
        assert_eq!(config.history.max_messages, 2);
        // Env override, then clamp to 40.
        assert_eq!(config.agent.recursion_limit, 40);
        assert_eq!(config.model.max_tokens, 128);
        assert_eq!(loaded.loaded_from().len(), 2);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_file_feeds_overrides() {
        clear_env();
        let project = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();
        fs::write(
            project.path().join(".env"),
            "MCP_BASE_URL=https://mcp.from-dotenv.example\nAGENT_HISTORY_MAX_MESSAGES=3\n",
        )
        .unwrap();

        let loaded = load_config_with_options(&options(&project, &config_dir)).unwrap();
        assert_eq!(loaded.env_files.len(), 1);
        assert_eq!(
            loaded.config.gateway.base_url.as_deref(),
            Some("https://mcp.from-dotenv.example")
        );
        assert_eq!(loaded.config.history.max_messages, 3);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_malformed_layer_warns_but_continues() {
        clear_env();
        let project = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();
        fs::write(project.path().join("tonpixo.toml"), "not valid toml {{{{").unwrap();

        let loaded = load_config_with_options(&options(&project, &config_dir)).unwrap();
        assert!(loaded.warnings[0].contains("Failed to load"));
        assert_eq!(loaded.config, {
            let mut defaults = TonpixoConfig::default();
            defaults.clamp();
            defaults
        });
    }

    #[test]
    #[serial]
    fn test_db_path_defaults_into_config_dir() {
        clear_env();
        let project = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();

        let loaded = load_config_with_options(&options(&project, &config_dir)).unwrap();
        assert_eq!(loaded.db_path(), config_dir.path().join("tonpixo.db"));
        assert_eq!(loaded.log_dir(), config_dir.path().join("logs"));
    }

    #[test]
    #[serial]
    fn test_discovery_fills_missing_url_only() {
        clear_env();
        let root = TempDir::new().unwrap();
        let project = root.path().join("backend");
        let runtime = root.path().join("tonpixo-mcp").join("runtime");
        fs::create_dir_all(&project).unwrap();
        fs::create_dir_all(&runtime).unwrap();
        fs::write(runtime.join("dev.env"), "MCP_BEARER_TOKEN=discovered\n").unwrap();
        fs::write(project.join("tonpixo.toml"), "[gateway]\nbearer_token = \"configured\"\n").unwrap();
        let config_dir = TempDir::new().unwrap();

        let loaded = load_config_with_options(&LoadOptions {
            project_dir: Some(project.clone()),
            config_dir: Some(config_dir.path().to_path_buf()),
            skip_env_files: true,
            skip_discovery: false,
        })
        .unwrap();

        assert_eq!(loaded.config.gateway.base_url.as_deref(), Some("http://127.0.0.1:8082"));
        assert_eq!(loaded.config.gateway.bearer_token.as_deref(), Some("configured"));
        assert!(loaded.discovered.is_some());
    }
}
