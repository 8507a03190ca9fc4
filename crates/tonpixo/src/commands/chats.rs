//! Chats command - a user's chat list.

use anyhow::Result;
use clap::Args;
use console::Style;

use super::Context;

/// Arguments for the chats command.
#[derive(Args, Debug)]
pub struct ChatsArgs {
    /// User id (chats created from the CLI use "local")
    #[arg(short, long, default_value = "local")]
    pub user: String,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

/// Run the chats command.
pub async fn run(args: ChatsArgs, ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    let chats = store.list_user_chats(&args.user, args.limit, args.offset)?;

    if ctx.json_output {
        return ctx.print_json(&chats);
    }

    if chats.is_empty() {
        println!("No chats for user {}.", args.user);
        return Ok(());
    }

    let dim = Style::new().dim();
    for chat in &chats {
        println!(
            "  {:<24} {:<40} {}",
            chat.chat_id,
            chat.title,
            dim.apply_to(format!(
                "{} {}",
                chat.job_id.as_deref().unwrap_or("-"),
                chat.updated_at.format("%Y-%m-%d %H:%M")
            ))
        );
    }
    Ok(())
}
