//! Analyst agent core for Tonpixo.
//!
//! This crate turns a natural-language question about a wallet's indexed
//! transaction history into an answer by running a tool-using model against
//! the remote capability service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  AnalystService                                             │
//! │  - Prepares the question and bounded history               │
//! │  - Builds the system prompt and per-invocation tools       │
//! │  - Persists turns and forwards telemetry                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!       ┌──────────┐    ┌──────────────┐  ┌──────────────────┐
//!       │  Agent   │    │ ToolRegistry │  │ StreamClassifier │
//!       │ (loop)   │    │ + SchemaGuard│  │ thinking / token │
//!       └──────────┘    └──────────────┘  └──────────────────┘
//!            │                 │
//!            ▼                 ▼
//!     tonpixo-llm       tonpixo-gateway
//! ```
//!
//! # Core Components
//!
//! - [`AnalystService`]: entry point for one question, blocking or streamed
//! - [`Agent`]: bounded reason/act loop over an [`LlmBackend`](tonpixo_llm::LlmBackend)
//! - [`SchemaGuard`]: refuses SQL until a schema resource was fetched
//! - [`StreamClassifier`]: relabels streamed text as reasoning or answer

pub mod agent;
pub mod classifier;
pub mod error;
pub mod guard;
pub mod history;
pub mod prompt;
pub mod service;
pub mod stream;
pub mod telemetry;
pub mod tool;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

// Re-export core types
pub use error::{AgentError, Result};

// Re-export agent
pub use agent::{Agent, AgentBuilder, AgentRun, NO_RESPONSE_MESSAGE, extract_final_answer};
pub use stream::{AgentEvent, AgentStream};

// Re-export tool types
pub use tool::{ParamExt, ParamResult, ParameterValidationError, Tool, ToolContext, ToolRegistry, ToolResult};
pub use tools::{ANALYST_TOOL_NAMES, REQUIRED_SERVICE_TOOLS, analyst_tools};

// Re-export guardrails and classification
pub use classifier::{ClassifiedEvent, StreamClassifier};
pub use guard::{SCHEMA_REQUIRED_MESSAGE, SchemaGuard};

// Re-export history and prompt helpers
pub use history::{HistoryLimits, HistoryMessage, load_history, truncate_text};
pub use prompt::{build_system_prompt, resolve_address};

// Re-export service
pub use service::{
    AnalystService, AskResponse, ChatRequest, ClassifiedStream, EMPTY_QUESTION_MESSAGE,
    ServiceSettings, prepare_question, validate_tool_inventory,
};

// Re-export telemetry
pub use telemetry::{
    EventCapture, NoopTelemetry, SharedTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry,
    flush_gateway_events,
};

// Cancellation is part of the public run API.
pub use tokio_util::sync::CancellationToken;
