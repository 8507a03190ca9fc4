//! Tonpixo - TON wallet analyst
//!
//! Main entry point for the Tonpixo CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tonpixo_config::{LoadOptions, load_config_with_options};

mod commands;

use commands::{ask, chats, config, history, resources, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Tonpixo - TON wallet analyst
#[derive(Parser)]
#[command(name = "tonpixo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Project directory holding tonpixo.toml and .env files (default: cwd)
    #[arg(long, global = true, env = "TONPIXO_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask the analyst a question about a job's wallet data
    Ask(ask::AskArgs),

    /// Inspect capability service resources
    Resources(resources::ResourcesArgs),

    /// List capability service tools and check the required inventory
    Tools(tools::ToolsArgs),

    /// Show the persisted turns of a chat
    History(history::HistoryArgs),

    /// List a user's chats
    Chats(chats::ChatsArgs),

    /// Configuration inspection
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = load_config_with_options(&LoadOptions {
        project_dir: cli.project_dir.clone(),
        ..LoadOptions::default()
    })?;

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "tonpixo=debug,tonpixo_agent=debug,tonpixo_llm=debug,tonpixo_gateway=debug,tonpixo_store=debug,tonpixo_config=debug,warn"
    } else {
        "tonpixo=info,tonpixo_agent=info,tonpixo_llm=info,tonpixo_gateway=info,tonpixo_store=info,warn"
    };

    let file_appender = tracing_appender::rolling::daily(loaded.log_dir(), "tonpixo.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "tonpixo=trace,tonpixo_agent=trace,tonpixo_llm=debug,tonpixo_gateway=debug,tonpixo_store=debug,tonpixo_config=debug,info",
                )),
        )
        .init();

    for warning in &loaded.warnings {
        tracing::warn!(%warning, "Configuration warning");
    }
    if let Some(found) = &loaded.discovered {
        tracing::info!(
            profile = found.profile,
            base_url = %found.base_url,
            source = %found.base_url_source,
            "Using discovered capability service"
        );
    }

    let ctx = commands::Context {
        loaded,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Ask(args) => ask::run(args, &ctx).await,
        Commands::Resources(args) => resources::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::History(args) => history::run(args, &ctx).await,
        Commands::Chats(args) => chats::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
