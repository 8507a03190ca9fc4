//! LLM backend abstraction for the Tonpixo analyst.
//!
//! The agent talks to models exclusively through the [`LlmBackend`] trait, so
//! providers and test doubles are interchangeable.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  LlmBackend trait                       │
//! │  - complete() -> CompletionResponse     │
//! │  - complete_stream() -> Stream<Event>   │
//! └─────────────────────────────────────────┘
//!          │                      │
//!          ▼                      ▼
//!   ┌──────────────┐       ┌─────────────┐
//!   │  Anthropic   │       │ MockBackend │
//!   └──────────────┘       └─────────────┘
//! ```
//!
//! Streamed events can be folded back into a full response with
//! [`StreamAccumulator`], which is how the agent consumes a stream while
//! forwarding its text deltas live.

pub mod anthropic;
pub mod backend;
pub mod error;
pub mod types;

pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use backend::{
    BlockStart, ContentDelta, LlmBackend, MockBackend, ResponseStream, SharedBackend,
    StreamAccumulator, StreamEvent, response_to_events, with_retry,
};
pub use error::{LlmError, Result};
pub use types::{
    CompletionRequest, CompletionResponse, Content, ContentBlock, Message, Role, StopReason,
    ToolDefinition, ToolResultBlock, ToolUseBlock, Usage,
};
