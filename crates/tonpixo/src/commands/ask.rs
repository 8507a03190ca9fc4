//! Ask command - one question to the analyst.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use console::Style;
use futures::StreamExt;
use tonpixo_agent::{CancellationToken, ChatRequest, ClassifiedEvent};

use super::Context;

/// User id recorded for chats created from the CLI.
const LOCAL_USER: &str = "local";

/// Chat titles are cut to this many characters.
const TITLE_MAX_CHARS: usize = 60;

/// Arguments for the ask command.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question to ask
    #[arg(required = true)]
    pub question: String,

    /// Job whose indexed data the question is about
    #[arg(short, long, env = "TONPIXO_JOB_ID")]
    pub job: String,

    /// Continue (or start) a persisted chat
    #[arg(short, long)]
    pub chat: Option<String>,

    /// User id attached to telemetry and new chats
    #[arg(long)]
    pub user: Option<String>,

    /// Replays with the same key persist the question once
    #[arg(long)]
    pub idempotency_key: Option<String>,

    /// Wallet address to register for the job before asking
    #[arg(long)]
    pub address: Option<String>,

    /// Wait for the full answer instead of streaming
    #[arg(long)]
    pub no_stream: bool,
}

/// Run the ask command.
pub async fn run(args: AskArgs, ctx: &Context) -> Result<()> {
    let (service, store) = ctx.service()?;
    let dim = Style::new().dim();

    if let Some(address) = &args.address {
        store.register_job(&args.job, address)?;
    }

    let user_id = args.user.clone().unwrap_or_else(|| LOCAL_USER.to_string());
    if let Some(chat_id) = &args.chat {
        let title: String = args.question.trim().chars().take(TITLE_MAX_CHARS).collect();
        let existing = store.get_chat(chat_id)?;
        let title = existing.map(|c| c.title).unwrap_or(title);
        store.save_chat(&user_id, chat_id, &title, Some(&args.job))?;
    }

    let mut request = ChatRequest::new(&args.job, &args.question).with_user(user_id);
    if let Some(chat_id) = &args.chat {
        request = request.with_chat(chat_id);
    }
    if let Some(key) = &args.idempotency_key {
        request = request.with_idempotency_key(key);
    }

    if ctx.verbose {
        println!("{}", dim.apply_to(format!("Job: {}", args.job)));
        if let Some(chat) = &args.chat {
            println!("{}", dim.apply_to(format!("Chat: {}", chat)));
        }
        println!();
    }

    if args.no_stream {
        let response = service.handle(&request).await;
        if ctx.json_output {
            return ctx.print_json(&response);
        }
        println!("{}", response.content);
        if ctx.verbose && let Some(trace_id) = &response.trace_id {
            println!("{}", dim.apply_to(format!("[trace {}]", trace_id)));
        }
        return Ok(());
    }

    let cancellation = CancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut stream = service.handle_stream(request, cancellation);

    // Track if we've printed anything (for final newline)
    let mut has_output = false;

    while let Some(event) = stream.next().await {
        if ctx.json_output {
            println!("{}", serde_json::to_string(&event)?);
            if let ClassifiedEvent::Error { content } = event {
                return Err(anyhow::anyhow!(content));
            }
            continue;
        }

        match event {
            ClassifiedEvent::Thinking { content } => {
                if ctx.verbose {
                    print!("{}", dim.apply_to(content));
                    std::io::stdout().flush()?;
                    has_output = true;
                }
            }
            ClassifiedEvent::Token { content } => {
                print!("{}", content);
                std::io::stdout().flush()?;
                has_output = true;
            }
            ClassifiedEvent::ToolStart { tool } => {
                if has_output {
                    println!();
                }
                println!("{}", dim.apply_to(format!("[Running: {}]", tool)));
                has_output = false;
            }
            ClassifiedEvent::ToolEnd { .. } => {
                println!("{}", dim.apply_to("[done]"));
            }
            ClassifiedEvent::TraceId { content } => {
                if ctx.verbose {
                    if has_output {
                        println!();
                    }
                    println!("{}", dim.apply_to(format!("[trace {}]", content)));
                    has_output = false;
                }
            }
            ClassifiedEvent::Done => {
                if has_output {
                    println!();
                }
            }
            ClassifiedEvent::Error { content } => {
                let red = Style::new().red();
                eprintln!();
                eprintln!("{} {}", red.apply_to("Error:"), content);
                return Err(anyhow::anyhow!(content));
            }
        }
    }

    Ok(())
}
