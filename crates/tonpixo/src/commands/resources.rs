//! Resources command - inspect capability service resources.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::Style;
use serde_json::json;
use tonpixo_gateway::{GatewayClient, MAX_RESOURCE_CHARS, ResourceGateway, resolve_resource_name};

use super::{Context, upstream_failure};

/// Arguments for the resources command.
#[derive(Args, Debug)]
pub struct ResourcesArgs {
    #[command(subcommand)]
    pub command: ResourcesCommand,
}

#[derive(Subcommand, Debug)]
pub enum ResourcesCommand {
    /// List available resource names
    List,

    /// Fetch one resource
    Get {
        /// Resource name (e.g. schema/transactions or resource://tonpixo/rules/compliance_rules)
        name: String,

        /// Keep only lines around this term
        #[arg(long)]
        focus: Option<String>,

        /// Character budget (clamped to the service's allowed range)
        #[arg(long)]
        max_chars: Option<usize>,
    },
}

/// Run the resources command.
pub async fn run(args: ResourcesArgs, ctx: &Context) -> Result<()> {
    let gateway = ctx.gateway()?;
    match args.command {
        ResourcesCommand::List => cmd_list(&gateway, ctx).await,
        ResourcesCommand::Get {
            name,
            focus,
            max_chars,
        } => cmd_get(&gateway, ctx, &name, focus.as_deref(), max_chars).await,
    }
}

async fn cmd_list(gateway: &GatewayClient, ctx: &Context) -> Result<()> {
    let names = gateway
        .list_resources(None)
        .await
        .map_err(|e| upstream_failure(gateway, e))?;

    if ctx.json_output {
        return ctx.print_json(&json!({ "resources": names }));
    }

    if names.is_empty() {
        println!("No resources available.");
        return Ok(());
    }
    for name in &names {
        println!("  {}", name);
    }
    Ok(())
}

async fn cmd_get(
    gateway: &GatewayClient,
    ctx: &Context,
    name: &str,
    focus: Option<&str>,
    max_chars: Option<usize>,
) -> Result<()> {
    let resolved = resolve_resource_name(name)?;
    let content = match (focus, max_chars) {
        (None, None) => gateway.get_resource(&resolved, None).await,
        _ => {
            let budget = max_chars.unwrap_or(MAX_RESOURCE_CHARS);
            gateway.get_resource_limited(&resolved, budget, focus).await
        }
    }
    .map_err(|e| upstream_failure(gateway, e))?;

    if ctx.json_output {
        return ctx.print_json(&json!({ "name": resolved, "content": content }));
    }

    if ctx.verbose {
        let dim = Style::new().dim();
        println!(
            "{}",
            dim.apply_to(format!("# {} ({} chars)", resolved, content.chars().count()))
        );
    }
    println!("{}", content);
    Ok(())
}
