//! The analyst control loop.
//!
//! ```text
//!            ┌──────────────┐  tool calls   ┌──────────┐
//!  start ──► │  Reasoning   │ ────────────► │  Acting  │
//!            │ (model call) │ ◄──────────── │ (tools)  │
//!            └──────┬───────┘   results     └──────────┘
//!                   │ no tool calls
//!                   ▼
//!             final answer
//! ```
//!
//! Every Reasoning and every Acting execution is one step. A step that would
//! exceed the recursion limit fails the run with
//! [`AgentError::RecursionLimit`].

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tonpixo_llm::{
    CompletionRequest, LlmBackend, Message, Role, SharedBackend, ToolResultBlock, ToolUseBlock,
    Usage,
};

use crate::error::{AgentError, Result};
use crate::stream::{AgentStream, create_run_stream};
use crate::tool::{ToolContext, ToolRegistry, ToolResult};

/// Answer used when no assistant message carries text.
pub const NO_RESPONSE_MESSAGE: &str = "I couldn't generate a response.";

pub const DEFAULT_MODEL: &str = tonpixo_config::DEFAULT_MODEL;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_RECURSION_LIMIT: u32 = 15;

// ─────────────────────────────────────────────────────────────────────────────
// Step Budget
// ─────────────────────────────────────────────────────────────────────────────

/// Counts executed steps against the recursion limit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepBudget {
    limit: u32,
    steps: u32,
}

impl StepBudget {
    pub(crate) fn new(limit: u32) -> Self {
        Self { limit, steps: 0 }
    }

    /// Claim one step, failing when the budget is already spent.
    pub(crate) fn begin(&mut self) -> Result<()> {
        if self.steps >= self.limit {
            return Err(AgentError::RecursionLimit(self.limit));
        }
        self.steps += 1;
        Ok(())
    }

    pub(crate) fn steps(&self) -> u32 {
        self.steps
    }
}

pub(crate) fn ensure_not_cancelled(cancellation: &CancellationToken) -> Result<()> {
    if cancellation.is_cancelled() {
        Err(AgentError::Cancelled)
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run Output
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    /// The extracted final answer.
    pub answer: String,
    /// Full message sequence, including tool exchanges.
    pub messages: Vec<Message>,
    /// Steps executed.
    pub steps: u32,
    /// Token usage summed over every model call.
    pub usage: Usage,
}

/// Pick the answer out of a finished message sequence.
///
/// The newest assistant message with non-empty text wins; tool-call messages
/// without text are skipped.
pub fn extract_final_answer(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.content.to_text())
        .find(|text| !text.trim().is_empty())
        .unwrap_or_else(|| NO_RESPONSE_MESSAGE.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

/// A configured control loop: model, tools and limits.
///
/// Cheap to clone; the streaming path moves a clone into its generator.
#[derive(Clone)]
pub struct Agent {
    pub(crate) backend: SharedBackend,
    pub(crate) tools: Arc<ToolRegistry>,
    model: String,
    max_tokens: u32,
    recursion_limit: u32,
    system_prompt: Option<String>,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn recursion_limit(&self) -> u32 {
        self.recursion_limit
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Build the request for one Reasoning step.
    pub(crate) fn build_request(&self, messages: &[Message]) -> CompletionRequest {
        let mut request = CompletionRequest::new(&self.model, messages.to_vec(), self.max_tokens)
            .with_temperature(0.0);
        if let Some(system) = &self.system_prompt {
            request = request.with_system(system);
        }
        if !self.tools.is_empty() {
            request = request.with_tools(self.tools.to_llm_definitions());
        }
        request
    }

    /// Run to completion on `messages` (history followed by the question).
    pub async fn run(
        &self,
        messages: Vec<Message>,
        job_id: &str,
        cancellation: &CancellationToken,
    ) -> Result<AgentRun> {
        let mut messages = messages;
        let mut budget = StepBudget::new(self.recursion_limit);
        let mut usage = Usage::default();
        let ctx = ToolContext::with_cancellation(job_id, cancellation.clone());

        tracing::info!(%job_id, messages = messages.len(), tools = self.tools.len(), "Run started");

        loop {
            ensure_not_cancelled(cancellation)?;
            budget.begin()?;

            let request = self.build_request(&messages);
            tracing::debug!(
                %job_id,
                step = budget.steps(),
                messages = messages.len(),
                model = %request.model,
                "Calling LLM"
            );

            let started = Instant::now();
            let response = self.backend.complete(request).await.map_err(|e| {
                tracing::error!(%job_id, step = budget.steps(), error = %e, "LLM call failed");
                e
            })?;
            usage.input_tokens += response.usage.input_tokens;
            usage.output_tokens += response.usage.output_tokens;

            tracing::debug!(
                %job_id,
                step = budget.steps(),
                stop_reason = ?response.stop_reason,
                has_tool_use = response.has_tool_use(),
                duration_ms = started.elapsed().as_millis() as u64,
                "LLM response received"
            );

            if !response.has_tool_use() {
                messages.push(response.into_message());
                break;
            }

            ensure_not_cancelled(cancellation)?;
            budget.begin()?;

            let tool_uses = response.tool_uses();
            tracing::info!(
                %job_id,
                step = budget.steps(),
                tools = %tool_uses.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", "),
                "Executing tools"
            );
            messages.push(response.into_message());

            let mut results = Vec::with_capacity(tool_uses.len());
            for tool_use in &tool_uses {
                ensure_not_cancelled(cancellation)?;
                let result = execute_tool(&self.tools, tool_use, &ctx).await;
                results.push(result_block(&tool_use.id, &result));
            }
            messages.push(Message::tool_results(results));
        }

        let answer = extract_final_answer(&messages);
        tracing::info!(
            %job_id,
            steps = budget.steps(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            answer_len = answer.len(),
            "Run completed"
        );

        Ok(AgentRun {
            answer,
            messages,
            steps: budget.steps(),
            usage,
        })
    }

    /// Run with streamed text deltas and tool events.
    pub fn run_stream(
        &self,
        messages: Vec<Message>,
        job_id: impl Into<String>,
        cancellation: CancellationToken,
    ) -> AgentStream {
        create_run_stream(self.clone(), messages, job_id.into(), cancellation)
    }
}

/// Dispatch one tool call. Failures become error results for the model.
pub(crate) async fn execute_tool(
    tools: &ToolRegistry,
    tool_use: &ToolUseBlock,
    ctx: &ToolContext,
) -> ToolResult {
    let ctx = ctx.for_call(&tool_use.id);
    let started = Instant::now();

    let result = match tools.execute(&tool_use.name, tool_use.input.clone(), &ctx).await {
        Ok(result) => result,
        Err(AgentError::ToolNotFound(name)) => {
            tracing::warn!(tool = %name, "Model requested an unknown tool");
            ToolResult::error(format!("tool '{}' is not available.", name))
        }
        Err(e) => {
            tracing::warn!(tool = %tool_use.name, error = %e, "Tool execution failed");
            ToolResult::error(e.to_string())
        }
    };

    tracing::debug!(
        tool = %tool_use.name,
        tool_call_id = %tool_use.id,
        success = result.is_success(),
        duration_ms = started.elapsed().as_millis() as u64,
        "Tool: completed"
    );
    result
}

pub(crate) fn result_block(tool_use_id: &str, result: &ToolResult) -> ToolResultBlock {
    if result.is_success() {
        ToolResultBlock::success(tool_use_id, result.to_llm_content())
    } else {
        ToolResultBlock::error(tool_use_id, result.to_llm_content())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`Agent`].
pub struct AgentBuilder {
    backend: Option<SharedBackend>,
    tools: ToolRegistry,
    model: String,
    max_tokens: u32,
    recursion_limit: u32,
    system_prompt: Option<String>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            tools: ToolRegistry::new(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            system_prompt: None,
        }
    }

    pub fn with_backend(mut self, backend: impl LlmBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    pub fn with_shared_backend(mut self, backend: SharedBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn build(self) -> Result<Agent> {
        let backend = self
            .backend
            .ok_or_else(|| AgentError::config("LLM backend is required"))?;
        if self.recursion_limit == 0 {
            return Err(AgentError::config("recursion limit must be at least 1"));
        }

        Ok(Agent {
            backend,
            tools: Arc::new(self.tools),
            model: self.model,
            max_tokens: self.max_tokens,
            recursion_limit: self.recursion_limit,
            system_prompt: self.system_prompt,
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::MockTool;
    use serde_json::json;
    use tonpixo_llm::{CompletionResponse, ContentBlock, Content, MockBackend, StopReason};

    fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse::new(
            "msg_1",
            "test-model",
            vec![ContentBlock::text(text)],
            StopReason::EndTurn,
            Usage::new(10, 20),
        )
    }

    fn tool_response(id: &str, name: &str, input: serde_json::Value) -> CompletionResponse {
        CompletionResponse::new(
            "msg_1",
            "test-model",
            vec![ContentBlock::tool_use(id, name, input)],
            StopReason::ToolUse,
            Usage::new(10, 5),
        )
    }

    fn registry_with(tool: MockTool) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(tool).unwrap();
        registry
    }

    #[test]
    fn test_builder_requires_backend() {
        assert!(Agent::builder().build().is_err());
    }

    #[test]
    fn test_step_budget() {
        let mut budget = StepBudget::new(2);
        assert!(budget.begin().is_ok());
        assert!(budget.begin().is_ok());
        assert!(matches!(budget.begin(), Err(AgentError::RecursionLimit(2))));
        assert_eq!(budget.steps(), 2);
    }

    #[test]
    fn test_final_answer_skips_tool_call_messages() {
        let messages = vec![
            Message::user("how much?"),
            Message::assistant("The answer is 42"),
            Message::assistant_blocks(vec![ContentBlock::tool_use("t1", "sql_query", json!({}))]),
        ];
        assert_eq!(extract_final_answer(&messages), "The answer is 42");

        let messages = vec![
            Message::user("q"),
            Message::assistant_blocks(vec![ContentBlock::tool_use("t1", "sql_query", json!({}))]),
            Message::tool_results(vec![ToolResultBlock::success("t1", "1")]),
            Message::assistant("The answer is 42"),
        ];
        assert_eq!(extract_final_answer(&messages), "The answer is 42");
    }

    #[test]
    fn test_final_answer_fallback() {
        assert_eq!(extract_final_answer(&[]), NO_RESPONSE_MESSAGE);
        let messages = vec![Message::user("q"), Message::assistant("   ")];
        assert_eq!(extract_final_answer(&messages), NO_RESPONSE_MESSAGE);
    }

    #[tokio::test]
    async fn test_simple_run_without_tools() {
        let backend = Arc::new(MockBackend::with_text("Hello there"));
        let agent = Agent::builder()
            .with_shared_backend(backend.clone())
            .with_system_prompt("SYSTEM")
            .build()
            .unwrap();

        let run = agent
            .run(vec![Message::user("hi")], "J1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.answer, "Hello there");
        assert_eq!(run.steps, 1);
        assert_eq!(run.usage, Usage::new(10, 20));

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system.as_deref(), Some("SYSTEM"));
        assert_eq!(requests[0].temperature, Some(0.0));
    }

    #[tokio::test]
    async fn test_run_executes_tool_and_attaches_result() {
        let backend = Arc::new(MockBackend::new(vec![
            tool_response("call_1", "echo", json!({"x": 1})),
            text_response("Done: 7"),
        ]));
        let tool = MockTool::new("echo").with_response(ToolResult::text("7"));
        let agent = Agent::builder()
            .with_shared_backend(backend.clone())
            .with_tools(registry_with(tool))
            .build()
            .unwrap();

        let run = agent
            .run(vec![Message::user("go")], "J1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.answer, "Done: 7");
        assert_eq!(run.steps, 3);
        // user, assistant tool call, tool results, final assistant
        assert_eq!(run.messages.len(), 4);
        match &run.messages[2].content {
            Content::Blocks(blocks) => assert_eq!(
                blocks[0],
                ContentBlock::ToolResult {
                    tool_use_id: "call_1".into(),
                    content: "7".into(),
                    is_error: false,
                }
            ),
            other => panic!("expected blocks, got {other:?}"),
        }

        let second = &backend.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.tools.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let backend = Arc::new(MockBackend::new(vec![
            tool_response("call_1", "drop_tables", json!({})),
            text_response("Sorry"),
        ]));
        let agent = Agent::builder()
            .with_shared_backend(backend)
            .build()
            .unwrap();

        let run = agent
            .run(vec![Message::user("go")], "J1", &CancellationToken::new())
            .await
            .unwrap();

        match &run.messages[2].content {
            Content::Blocks(blocks) => assert_eq!(
                blocks[0],
                ContentBlock::ToolResult {
                    tool_use_id: "call_1".into(),
                    content: "Error: tool 'drop_tables' is not available.".into(),
                    is_error: true,
                }
            ),
            other => panic!("expected blocks, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_always_tool_calling_model_hits_recursion_limit() {
        let backend = Arc::new(MockBackend::repeating(tool_response(
            "call_1",
            "echo",
            json!({}),
        )));
        let agent = Agent::builder()
            .with_shared_backend(backend.clone())
            .with_tools(registry_with(MockTool::new("echo")))
            .with_recursion_limit(4)
            .build()
            .unwrap();

        let err = agent
            .run(vec![Message::user("loop")], "J1", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::RecursionLimit(4)));
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let backend = Arc::new(MockBackend::with_text("never"));
        let agent = Agent::builder()
            .with_shared_backend(backend.clone())
            .build()
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = agent
            .run(vec![Message::user("q")], "J1", &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_tools_run_sequentially_in_request_order() {
        let response = CompletionResponse::new(
            "msg_1",
            "test-model",
            vec![
                ContentBlock::tool_use("a", "echo", json!({"n": 1})),
                ContentBlock::tool_use("b", "echo", json!({"n": 2})),
            ],
            StopReason::ToolUse,
            Usage::default(),
        );
        let backend = MockBackend::new(vec![response, text_response("ok")]);
        let tool = Arc::new(MockTool::new("echo"));
        let mut registry = ToolRegistry::new();
        registry.register_arc(tool.clone()).unwrap();
        let agent = Agent::builder()
            .with_backend(backend)
            .with_tools(registry)
            .build()
            .unwrap();

        let run = agent
            .run(vec![Message::user("q")], "J1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(tool.calls(), vec![json!({"n": 1}), json!({"n": 2})]);
        match &run.messages[2].content {
            Content::Blocks(blocks) => {
                let ids: Vec<_> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                        _ => None,
                    })
                    .collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("expected blocks, got {other:?}"),
        }
    }
}
