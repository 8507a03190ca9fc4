//! Config command - configuration inspection.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use super::Context;

/// Shown instead of the bearer token.
const REDACTED: &str = "********";

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;
    let mut config = loaded.config.clone();
    if config.gateway.bearer_token.is_some() {
        config.gateway.bearer_token = Some(REDACTED.to_string());
    }

    if ctx.json_output {
        return ctx.print_json(&json!({
            "config": config,
            "db_path": loaded.db_path(),
            "log_dir": loaded.log_dir(),
            "warnings": loaded.warnings,
        }));
    }

    println!("# Tonpixo Configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    println!("Capability service:");
    println!(
        "  base_url: {}",
        config.gateway.base_url.as_deref().unwrap_or("(not configured)")
    );
    println!(
        "  token: {}",
        if config.gateway.bearer_token.is_some() { "set" } else { "not set" }
    );
    println!(
        "  timeout: {}ms  retries: {}  cache ttl: {}s",
        config.gateway.timeout_ms, config.gateway.retry_max, config.gateway.cache_ttl_seconds
    );
    if let Some(found) = &loaded.discovered {
        println!(
            "  discovered: {} profile from {} ({})",
            found.profile,
            found.repo_dir.display(),
            found.base_url_source
        );
    }
    println!();

    println!("Agent:");
    println!("  prompt mode: {}", config.agent.prompt_mode.as_str());
    println!("  recursion limit: {}", config.agent.recursion_limit);
    println!(
        "  schema before SQL: {}",
        config.agent.require_schema_before_sql
    );
    println!(
        "  model: {} (max {} tokens)",
        config.model.model, config.model.max_tokens
    );
    println!(
        "  history: {} fetched, {} kept, {} chars",
        config.history.fetch_limit, config.history.max_messages, config.history.max_chars
    );
    println!();

    println!("Storage:");
    println!("  database: {}", loaded.db_path().display());
    println!("  logs: {}", loaded.log_dir().display());
    println!();

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        if let Ok(toml_str) = config.to_toml() {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;

    if ctx.json_output {
        let sources: Vec<_> = loaded
            .sources
            .iter()
            .map(|s| json!({ "path": s.path, "loaded": s.loaded }))
            .collect();
        return ctx.print_json(&json!({ "sources": sources, "env_files": loaded.env_files }));
    }

    println!("Config file search order (later overrides earlier):\n");
    for source in &loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }

    if !loaded.env_files.is_empty() {
        println!("\nEnvironment files:\n");
        for path in &loaded.env_files {
            println!("  ✓ {}", path.display());
        }
    }
    println!();
    println!("Environment variables override every file.");
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    match tonpixo_config::config_path() {
        Some(path) if ctx.json_output => ctx.print_json(&json!({ "path": path })),
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => Err(anyhow::anyhow!("Could not determine config directory")),
    }
}
