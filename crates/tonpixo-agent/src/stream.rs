//! Streaming variant of the control loop.
//!
//! Each Reasoning step consumes the backend's event stream, forwarding text
//! deltas as they arrive while a [`StreamAccumulator`] rebuilds the full
//! response. Tool calls are then executed exactly as in [`Agent::run`].
//!
//! [`Agent::run`]: crate::agent::Agent::run

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tonpixo_llm::{ContentDelta, Message, StreamAccumulator, StreamEvent};

use crate::agent::{
    Agent, StepBudget, ensure_not_cancelled, execute_tool, extract_final_answer, result_block,
};
use crate::error::Result;
use crate::tool::ToolContext;

// ─────────────────────────────────────────────────────────────────────────────
// Agent Events
// ─────────────────────────────────────────────────────────────────────────────

/// A raw event from a streaming run, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A text delta from the model.
    Token { text: String },
    /// A tool call is about to run.
    ToolStart { id: String, name: String },
    /// A tool call finished.
    ToolEnd {
        id: String,
        name: String,
        success: bool,
    },
    /// The run reached a final answer.
    Completed { answer: String, steps: u32 },
}

impl AgentEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { text: text.into() }
    }

    pub fn tool_start(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ToolStart {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn tool_end(id: impl Into<String>, name: impl Into<String>, success: bool) -> Self {
        Self::ToolEnd {
            id: id.into(),
            name: name.into(),
            success,
        }
    }
}

/// A boxed stream of run events. An `Err` item ends the stream.
pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Run Stream
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn create_run_stream(
    agent: Agent,
    messages: Vec<Message>,
    job_id: String,
    cancellation: CancellationToken,
) -> AgentStream {
    Box::pin(run_events(agent, messages, job_id, cancellation))
}

fn run_events(
    agent: Agent,
    messages: Vec<Message>,
    job_id: String,
    cancellation: CancellationToken,
) -> impl Stream<Item = Result<AgentEvent>> + Send + 'static {
    async_stream::try_stream! {
        let mut messages = messages;
        let mut budget = StepBudget::new(agent.recursion_limit());
        let ctx = ToolContext::with_cancellation(job_id.clone(), cancellation.clone());

        tracing::info!(%job_id, messages = messages.len(), "Streaming run started");

        loop {
            ensure_not_cancelled(&cancellation)?;
            budget.begin()?;

            let request = agent.build_request(&messages).with_streaming();
            tracing::debug!(%job_id, step = budget.steps(), "Calling LLM (stream)");

            let mut events = agent.backend.complete_stream(request).await?;
            let mut accumulator = StreamAccumulator::new();

            while let Some(event) = events.next().await {
                ensure_not_cancelled(&cancellation)?;
                let event = event?;
                accumulator.push(&event)?;

                if let StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::TextDelta(text),
                    ..
                } = &event
                {
                    if !text.is_empty() {
                        yield AgentEvent::token(text.clone());
                    }
                }
                if matches!(event, StreamEvent::MessageStop) {
                    break;
                }
            }

            let response = accumulator.finish()?;
            if !response.has_tool_use() {
                messages.push(response.into_message());
                break;
            }

            ensure_not_cancelled(&cancellation)?;
            budget.begin()?;

            let tool_uses = response.tool_uses();
            messages.push(response.into_message());

            let mut results = Vec::with_capacity(tool_uses.len());
            for tool_use in &tool_uses {
                ensure_not_cancelled(&cancellation)?;
                yield AgentEvent::tool_start(&tool_use.id, &tool_use.name);

                let result = execute_tool(&agent.tools, tool_use, &ctx).await;

                yield AgentEvent::tool_end(&tool_use.id, &tool_use.name, result.is_success());
                results.push(result_block(&tool_use.id, &result));
            }
            messages.push(Message::tool_results(results));
        }

        let answer = extract_final_answer(&messages);
        tracing::info!(%job_id, steps = budget.steps(), "Streaming run completed");
        yield AgentEvent::Completed { answer, steps: budget.steps() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::tool::{MockTool, ToolRegistry};
    use serde_json::json;
    use crate::testing::CutOffBackend;
    use tonpixo_llm::{CompletionResponse, ContentBlock, MockBackend, StopReason, Usage};

    fn agent_with(backend: MockBackend, limit: u32) -> Agent {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("sql_query")).unwrap();
        Agent::builder()
            .with_backend(backend)
            .with_tools(registry)
            .with_recursion_limit(limit)
            .build()
            .unwrap()
    }

    async fn collect(stream: AgentStream) -> Vec<Result<AgentEvent>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_stream_emits_tokens_tools_and_completion() {
        let first = CompletionResponse::new(
            "m1",
            "model",
            vec![
                ContentBlock::text("Checking."),
                ContentBlock::tool_use("t1", "sql_query", json!({"query": "SELECT 1"})),
            ],
            StopReason::ToolUse,
            Usage::new(1, 1),
        );
        let second = CompletionResponse::new(
            "m2",
            "model",
            vec![ContentBlock::text("Total is 3.")],
            StopReason::EndTurn,
            Usage::new(1, 1),
        );
        let agent = agent_with(MockBackend::new(vec![first, second]), 15);

        let events: Vec<AgentEvent> = collect(agent.run_stream(
            vec![Message::user("q")],
            "J1",
            CancellationToken::new(),
        ))
        .await
        .into_iter()
        .map(|e| e.unwrap())
        .collect();

        assert_eq!(
            events,
            vec![
                AgentEvent::token("Checking."),
                AgentEvent::tool_start("t1", "sql_query"),
                AgentEvent::tool_end("t1", "sql_query", true),
                AgentEvent::token("Total is 3."),
                AgentEvent::Completed {
                    answer: "Total is 3.".into(),
                    steps: 3,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_ends_with_recursion_error() {
        let looping = CompletionResponse::new(
            "m",
            "model",
            vec![ContentBlock::tool_use("t", "sql_query", json!({}))],
            StopReason::ToolUse,
            Usage::default(),
        );
        let agent = agent_with(MockBackend::repeating(looping), 4);

        let events = collect(agent.run_stream(vec![Message::user("q")], "J1", CancellationToken::new())).await;
        let last = events.last().unwrap();
        assert!(matches!(last, Err(AgentError::RecursionLimit(4))));
        assert_eq!(
            events.iter().filter(|e| matches!(e, Ok(AgentEvent::ToolStart { .. }))).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_stream_cancelled() {
        let agent = agent_with(MockBackend::with_text("hi"), 15);
        let token = CancellationToken::new();
        token.cancel();

        let events = collect(agent.run_stream(vec![Message::user("q")], "J1", token)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Err(e) if e.is_cancelled()));
    }

    #[tokio::test]
    async fn test_stream_cut_off_mid_answer_is_error() {
        let agent = Agent::builder()
            .with_backend(CutOffBackend::new("You sent 4"))
            .with_tools(ToolRegistry::new())
            .build()
            .unwrap();

        let events = collect(agent.run_stream(vec![Message::user("q")], "J1", CancellationToken::new())).await;
        assert!(matches!(&events[0], Ok(AgentEvent::Token { .. })));
        assert!(matches!(events.last(), Some(Err(AgentError::Llm(_)))));
        assert!(!events.iter().any(|e| matches!(e, Ok(AgentEvent::Completed { .. }))));
    }

    #[tokio::test]
    async fn test_stream_backend_failure_surfaces() {
        let agent = agent_with(MockBackend::new(vec![]), 15);
        let events = collect(agent.run_stream(vec![Message::user("q")], "J1", CancellationToken::new())).await;
        assert!(matches!(&events[0], Err(AgentError::Llm(_))));
    }
}
