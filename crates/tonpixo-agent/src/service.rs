//! The analyst service: one question in, one answer (or event stream) out.
//!
//! ```text
//!  ask / ask_stream
//!    │ prepare question (trim, truncate, reject blank)
//!    │ start trace, attach EventCapture to the gateway
//!    ▼
//!  session setup ── tool inventory check (optional)
//!    │             ── wallet address lookup
//!    │             ── system prompt (lean / full)
//!    │             ── per-invocation tools + SchemaGuard
//!    │             ── bounded history
//!    ▼
//!  Agent::run / Agent::run_stream ──► StreamClassifier (streaming only)
//!    │
//!    ▼
//!  flush gateway events to telemetry (every exit path)
//! ```
//!
//! [`AnalystService::handle`] and [`AnalystService::handle_stream`] add turn
//! persistence around the same flow.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tonpixo_config::{PromptMode, TonpixoConfig};
use tonpixo_gateway::{ResourceGateway, SharedGateway};
use tonpixo_llm::{Message, SharedBackend};
use tonpixo_store::{NewTurn, Role, SharedJobDirectory, SharedTurnStore, TurnId};

use crate::agent::{Agent, AgentRun, NO_RESPONSE_MESSAGE};
use crate::classifier::{ClassifiedEvent, StreamClassifier};
use crate::error::{AgentError, Result};
use crate::guard::SchemaGuard;
use crate::history::{HistoryLimits, HistoryMessage, load_history, truncate_text};
use crate::prompt::{build_system_prompt, resolve_address};
use crate::telemetry::{EventCapture, NoopTelemetry, SharedTelemetry, flush_gateway_events};
use crate::tools::{REQUIRED_SERVICE_TOOLS, analyst_tools};

/// Reply to a blank question.
pub const EMPTY_QUESTION_MESSAGE: &str = "Please provide a non-empty question.";

/// A stream of events for the caller.
pub type ClassifiedStream = Pin<Box<dyn Stream<Item = ClassifiedEvent> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Per-invocation knobs, taken from [`TonpixoConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub model: String,
    pub max_tokens: u32,
    pub prompt_mode: PromptMode,
    pub recursion_limit: u32,
    pub require_schema_before_sql: bool,
    pub validate_tool_inventory: bool,
    pub question_max_chars: usize,
    pub resource_max_chars: usize,
    pub history: HistoryLimits,
}

impl From<&TonpixoConfig> for ServiceSettings {
    fn from(config: &TonpixoConfig) -> Self {
        Self {
            model: config.model.model.clone(),
            max_tokens: config.model.max_tokens,
            prompt_mode: config.agent.prompt_mode,
            recursion_limit: config.agent.recursion_limit,
            require_schema_before_sql: config.agent.require_schema_before_sql,
            validate_tool_inventory: config.agent.validate_tool_inventory,
            question_max_chars: config.agent.question_max_chars,
            resource_max_chars: config.agent.resource_max_chars,
            history: HistoryLimits::from(&config.history),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&TonpixoConfig::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests / Responses
// ─────────────────────────────────────────────────────────────────────────────

/// Answer to a non-streaming question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub content: String,
    pub trace_id: Option<String>,
}

impl AskResponse {
    fn message(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            trace_id: None,
        }
    }
}

/// A chat request with persistence metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub job_id: String,
    pub question: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Replays with the same key persist the user turn only once.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl ChatRequest {
    pub fn new(job_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            question: question.into(),
            user_id: None,
            chat_id: None,
            idempotency_key: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Key for the agent turn, derived from the request key.
    fn agent_idempotency_key(&self) -> Option<String> {
        self.idempotency_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(|k| format!("{k}#agent"))
    }
}

/// Trim and bound a question. `None` for blank input.
pub fn prepare_question(question: &str, max_chars: usize) -> Option<String> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate_text(trimmed, max_chars))
}

/// Check the service exposes every required tool. Returns the missing
/// names, sorted; a listing failure is logged and reported as nothing missing.
pub async fn validate_tool_inventory(gateway: &dyn ResourceGateway) -> Vec<String> {
    let available = match gateway.list_tools(None).await {
        Ok(tools) => tools,
        Err(e) => {
            tracing::warn!(error = %e, "Could not validate MCP tool inventory");
            return Vec::new();
        }
    };

    let available: HashSet<&str> = available.iter().map(String::as_str).collect();
    let mut missing: Vec<String> = REQUIRED_SERVICE_TOOLS
        .iter()
        .filter(|name| !available.contains(*name))
        .map(|name| name.to_string())
        .collect();
    missing.sort();

    if !missing.is_empty() {
        tracing::warn!(missing = %missing.join(", "), "MCP tool inventory is missing required tools");
    }
    missing
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

struct Invocation {
    agent: Agent,
    messages: Vec<Message>,
}

/// Entry point for analyst questions.
///
/// Every collaborator is injected; the service itself holds no mutable state,
/// so clones are cheap and independent invocations never share a guard,
/// classifier or event capture.
#[derive(Clone)]
pub struct AnalystService {
    backend: SharedBackend,
    gateway: SharedGateway,
    turns: Option<SharedTurnStore>,
    jobs: Option<SharedJobDirectory>,
    telemetry: SharedTelemetry,
    settings: ServiceSettings,
}

impl AnalystService {
    pub fn new(backend: SharedBackend, gateway: SharedGateway, settings: ServiceSettings) -> Self {
        Self {
            backend,
            gateway,
            turns: None,
            jobs: None,
            telemetry: Arc::new(NoopTelemetry),
            settings,
        }
    }

    pub fn with_turn_store(mut self, turns: SharedTurnStore) -> Self {
        self.turns = Some(turns);
        self
    }

    pub fn with_job_directory(mut self, jobs: SharedJobDirectory) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session setup
    // ─────────────────────────────────────────────────────────────────────────

    async fn prepare(
        &self,
        job_id: &str,
        question: &str,
        chat_id: Option<&str>,
        capture: Arc<EventCapture>,
    ) -> Result<Invocation> {
        let gateway = self.gateway.with_observer(capture);
        let guard = SchemaGuard::new(self.settings.require_schema_before_sql);

        if self.settings.validate_tool_inventory {
            validate_tool_inventory(gateway.as_ref()).await;
        }

        let address = resolve_address(self.jobs.as_deref(), job_id);
        let system_prompt = build_system_prompt(
            self.settings.prompt_mode,
            gateway.as_ref(),
            job_id,
            &address,
            guard.is_enabled(),
        )
        .await;

        let tools = analyst_tools(gateway, guard, self.settings.resource_max_chars)?;

        let mut messages: Vec<Message> =
            load_history(self.turns.as_deref(), chat_id, question, &self.settings.history)
                .iter()
                .map(HistoryMessage::to_message)
                .collect();
        messages.push(Message::user(question));

        let agent = Agent::builder()
            .with_shared_backend(self.backend.clone())
            .with_tools(tools)
            .with_model(&self.settings.model)
            .with_max_tokens(self.settings.max_tokens)
            .with_recursion_limit(self.settings.recursion_limit)
            .with_system_prompt(system_prompt)
            .build()?;

        Ok(Invocation { agent, messages })
    }

    fn flush_telemetry(
        &self,
        capture: &EventCapture,
        trace_id: Option<&str>,
        job_id: &str,
        user_id: Option<&str>,
    ) {
        let events = capture.take();
        flush_gateway_events(self.telemetry.as_ref(), &events, trace_id, job_id, user_id);
    }

    /// Run one prepared question to completion. The trace id is returned
    /// alongside the outcome so callers can attach it on success.
    async fn run_question(
        &self,
        job_id: &str,
        question: &str,
        user_id: Option<&str>,
        chat_id: Option<&str>,
        cancellation: &CancellationToken,
    ) -> (Result<AgentRun>, Option<String>) {
        let trace_id = self.telemetry.start_trace(job_id, user_id);
        let capture = Arc::new(EventCapture::new());

        tracing::info!(%job_id, chat_id, question_len = question.chars().count(), "Question received");

        let outcome = match self.prepare(job_id, question, chat_id, capture.clone()).await {
            Ok(Invocation { agent, messages }) => agent.run(messages, job_id, cancellation).await,
            Err(e) => Err(e),
        };

        self.flush_telemetry(&capture, trace_id.as_deref(), job_id, user_id);
        (outcome, trace_id)
    }

    fn error_response(job_id: &str, error: &AgentError) -> AskResponse {
        tracing::error!(%job_id, error = %error, "Analysis failed");
        AskResponse::message(format!(
            "I encountered an error analyzing the data: {}",
            error
        ))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ask
    // ─────────────────────────────────────────────────────────────────────────

    /// Answer one question.
    pub async fn ask(
        &self,
        job_id: &str,
        question: &str,
        user_id: Option<&str>,
        chat_id: Option<&str>,
    ) -> AskResponse {
        self.ask_with_cancellation(job_id, question, user_id, chat_id, &CancellationToken::new())
            .await
    }

    pub async fn ask_with_cancellation(
        &self,
        job_id: &str,
        question: &str,
        user_id: Option<&str>,
        chat_id: Option<&str>,
        cancellation: &CancellationToken,
    ) -> AskResponse {
        let Some(question) = prepare_question(question, self.settings.question_max_chars) else {
            return AskResponse::message(EMPTY_QUESTION_MESSAGE);
        };

        match self
            .run_question(job_id, &question, user_id, chat_id, cancellation)
            .await
        {
            (Ok(run), trace_id) => AskResponse {
                content: run.answer,
                trace_id,
            },
            (Err(e), _) => Self::error_response(job_id, &e),
        }
    }

    /// Answer one question as a stream of classified events.
    ///
    /// The stream always ends with `done` or `error`. Dropping it stops the
    /// run at its next suspension point.
    pub fn ask_stream(
        &self,
        job_id: impl Into<String>,
        question: impl Into<String>,
        user_id: Option<String>,
        chat_id: Option<String>,
        cancellation: CancellationToken,
    ) -> ClassifiedStream {
        let service = self.clone();
        let job_id = job_id.into();
        let question = question.into();

        Box::pin(async_stream::stream! {
            let Some(question) = prepare_question(&question, service.settings.question_max_chars) else {
                yield ClassifiedEvent::error(EMPTY_QUESTION_MESSAGE);
                return;
            };

            let trace_id = service.telemetry.start_trace(&job_id, user_id.as_deref());
            let capture = Arc::new(EventCapture::new());
            let mut classifier = StreamClassifier::new();
            let mut failure: Option<AgentError> = None;

            tracing::info!(%job_id, chat_id = chat_id.as_deref(), "Streaming question received");

            match service.prepare(&job_id, &question, chat_id.as_deref(), capture.clone()).await {
                Ok(Invocation { agent, messages }) => {
                    let mut events = agent.run_stream(messages, job_id.clone(), cancellation.clone());
                    while let Some(event) = events.next().await {
                        match event {
                            Ok(event) => {
                                for out in classifier.classify(&event) {
                                    yield out;
                                }
                            }
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => failure = Some(e),
            }

            service.flush_telemetry(&capture, trace_id.as_deref(), &job_id, user_id.as_deref());

            match failure {
                None => {
                    for out in classifier.finish() {
                        yield out;
                    }
                    if let Some(trace_id) = trace_id {
                        yield ClassifiedEvent::TraceId { content: trace_id };
                    }
                    yield ClassifiedEvent::Done;
                }
                Some(e) if e.is_cancelled() => {
                    tracing::info!(%job_id, "Streaming question cancelled");
                    yield ClassifiedEvent::error("Cancelled");
                }
                Some(e) => {
                    tracing::error!(%job_id, error = %e, "Streaming analysis failed");
                    yield ClassifiedEvent::error(format!("I encountered an error: {}", e));
                }
            }
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persisted chat
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a turn, logging (not propagating) failures.
    fn persist_turn(
        &self,
        chat_id: &str,
        role: Role,
        content: &str,
        trace_id: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Option<TurnId> {
        let store = self.turns.as_ref()?;
        let turn = NewTurn::new(chat_id, role, content)
            .with_trace_id(trace_id)
            .with_idempotency_key(idempotency_key);
        match store.append_turn(&turn) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(%chat_id, %role, error = %e, "Failed to persist turn");
                None
            }
        }
    }

    /// Answer a chat request, persisting the user turn first and the agent
    /// turn on success.
    pub async fn handle(&self, request: &ChatRequest) -> AskResponse {
        let Some(question) = prepare_question(&request.question, self.settings.question_max_chars)
        else {
            return AskResponse::message(EMPTY_QUESTION_MESSAGE);
        };

        if let Some(chat_id) = &request.chat_id {
            self.persist_turn(
                chat_id,
                Role::User,
                &question,
                None,
                request.idempotency_key.as_deref(),
            );
        }

        let (outcome, trace_id) = self
            .run_question(
                &request.job_id,
                &question,
                request.user_id.as_deref(),
                request.chat_id.as_deref(),
                &CancellationToken::new(),
            )
            .await;

        match outcome {
            Ok(run) => {
                if let Some(chat_id) = &request.chat_id {
                    self.persist_turn(
                        chat_id,
                        Role::Agent,
                        &run.answer,
                        trace_id.as_deref(),
                        request.agent_idempotency_key().as_deref(),
                    );
                }
                AskResponse {
                    content: run.answer,
                    trace_id,
                }
            }
            Err(e) => Self::error_response(&request.job_id, &e),
        }
    }

    /// Streaming form of [`AnalystService::handle`]. The agent turn holds the
    /// concatenated answer tokens and is written just before `done`.
    pub fn handle_stream(
        &self,
        request: ChatRequest,
        cancellation: CancellationToken,
    ) -> ClassifiedStream {
        let service = self.clone();

        Box::pin(async_stream::stream! {
            let Some(question) = prepare_question(&request.question, service.settings.question_max_chars) else {
                yield ClassifiedEvent::error(EMPTY_QUESTION_MESSAGE);
                return;
            };

            if let Some(chat_id) = &request.chat_id {
                service.persist_turn(
                    chat_id,
                    Role::User,
                    &question,
                    None,
                    request.idempotency_key.as_deref(),
                );
            }

            let mut inner = service.ask_stream(
                request.job_id.clone(),
                question,
                request.user_id.clone(),
                request.chat_id.clone(),
                cancellation,
            );

            let mut answer = String::new();
            let mut trace_id: Option<String> = None;

            while let Some(event) = inner.next().await {
                match &event {
                    ClassifiedEvent::Token { content } => answer.push_str(content),
                    ClassifiedEvent::TraceId { content } => trace_id = Some(content.clone()),
                    ClassifiedEvent::Done => {
                        if let Some(chat_id) = &request.chat_id {
                            let content = if answer.trim().is_empty() {
                                NO_RESPONSE_MESSAGE
                            } else {
                                answer.as_str()
                            };
                            service.persist_turn(
                                chat_id,
                                Role::Agent,
                                content,
                                trace_id.as_deref(),
                                request.agent_idempotency_key().as_deref(),
                            );
                        }
                    }
                    _ => {}
                }
                yield event;
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
