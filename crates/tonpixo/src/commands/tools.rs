//! Tools command - capability service tool inventory.

use anyhow::Result;
use clap::Args;
use console::Style;
use serde_json::json;
use tonpixo_agent::{ANALYST_TOOL_NAMES, REQUIRED_SERVICE_TOOLS};
use tonpixo_gateway::ResourceGateway;

use super::{Context, upstream_failure};

/// Arguments for the tools command.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Also list the tools the analyst model is offered
    #[arg(long)]
    pub agent: bool,
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let gateway = ctx.gateway()?;
    let available = gateway
        .list_tools(None)
        .await
        .map_err(|e| upstream_failure(&gateway, e))?;

    let mut missing: Vec<&str> = REQUIRED_SERVICE_TOOLS
        .iter()
        .copied()
        .filter(|name| !available.iter().any(|a| a.as_str() == *name))
        .collect();
    missing.sort();

    if ctx.json_output {
        let mut out = json!({ "service_tools": available, "missing": missing });
        if args.agent {
            out["agent_tools"] = json!(ANALYST_TOOL_NAMES);
        }
        return ctx.print_json(&out);
    }

    let green = Style::new().green();
    let red = Style::new().red();

    println!("Service tools:");
    for name in &available {
        let marker = if REQUIRED_SERVICE_TOOLS.contains(&name.as_str()) {
            green.apply_to("✓ required").to_string()
        } else {
            String::new()
        };
        println!("  {:<24} {}", name, marker);
    }

    if !missing.is_empty() {
        println!();
        println!("{} {}", red.apply_to("Missing required tools:"), missing.join(", "));
    }

    if args.agent {
        println!();
        println!("Analyst tools:");
        for name in ANALYST_TOOL_NAMES {
            println!("  {}", name);
        }
    }

    Ok(())
}
