//! History command - persisted turns of one chat.

use anyhow::Result;
use clap::Args;
use console::Style;
use tonpixo_store::Role;

use super::Context;

/// Arguments for the history command.
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Chat id
    pub chat: String,

    /// Show only the newest N turns
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Run the history command.
pub async fn run(args: HistoryArgs, ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    let turns = match args.limit {
        Some(limit) => store.list_recent(&args.chat, limit)?,
        None => store.list_all(&args.chat)?,
    };

    if ctx.json_output {
        return ctx.print_json(&turns);
    }

    if turns.is_empty() {
        println!("No turns in chat {}.", args.chat);
        return Ok(());
    }

    let dim = Style::new().dim();
    let user = Style::new().cyan().bold();
    let agent = Style::new().green().bold();

    for turn in &turns {
        let label = match turn.role {
            Role::User => user.apply_to("user "),
            Role::Agent => agent.apply_to("agent"),
        };
        println!(
            "{} {}",
            label,
            dim.apply_to(turn.created_at.format("%Y-%m-%d %H:%M:%S"))
        );
        println!("{}", turn.content);
        if ctx.verbose && let Some(trace_id) = &turn.trace_id {
            println!("{}", dim.apply_to(format!("[trace {}]", trace_id)));
        }
        println!();
    }

    Ok(())
}
