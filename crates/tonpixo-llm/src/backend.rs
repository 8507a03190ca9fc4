//! The backend seam, streaming events, and the scripted test backend.
//!
//! This module defines the abstraction layer over model providers, the
//! streaming event vocabulary, and a mock backend for deterministic tests.

use async_trait::async_trait;
use futures::Stream;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, ContentBlock, StopReason, Usage};

// ─────────────────────────────────────────────────────────────────────────────
// Shared Retry Logic
// ─────────────────────────────────────────────────────────────────────────────

/// Retry `operation` while it fails with a retryable error, doubling the
/// backoff after each attempt.
///
/// Retries only on transient errors (network failures, rate limits).
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                tracing::warn!(
                    backend = backend_name,
                    attempt,
                    max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Types
// ─────────────────────────────────────────────────────────────────────────────

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'static>>;

/// One server-sent event of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Message started.
    MessageStart { id: String, model: String },
    /// Content block started.
    ContentBlockStart { index: usize, block: BlockStart },
    /// Delta within a content block.
    ContentBlockDelta { index: usize, delta: ContentDelta },
    /// Content block finished.
    ContentBlockStop { index: usize },
    /// Message finished with final usage stats.
    MessageDelta {
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Message complete.
    MessageStop,
    /// Keep-alive.
    Ping,
    /// Error occurred.
    Error { message: String },
}

/// The kind of content block being opened in a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStart {
    Text,
    ToolUse { id: String, name: String },
}

/// Delta content in a streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentDelta {
    /// Text being streamed.
    TextDelta(String),
    /// Partial JSON for tool input.
    InputJsonDelta(String),
}

impl StreamEvent {
    /// True for the last event a provider sends for one message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::MessageStop | StreamEvent::Error { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Accumulation
// ─────────────────────────────────────────────────────────────────────────────

enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
}

/// Folds a sequence of [`StreamEvent`]s back into a [`CompletionResponse`].
///
/// Tool inputs arrive as partial JSON fragments; they are parsed once the
/// owning block is complete. An empty fragment sequence yields `{}`.
#[derive(Default)]
pub struct StreamAccumulator {
    id: String,
    model: String,
    blocks: BTreeMap<usize, PartialBlock>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    stopped: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Error events become [`LlmError::Stream`].
    pub fn push(&mut self, event: &StreamEvent) -> Result<()> {
        match event {
            StreamEvent::MessageStart { id, model } => {
                self.id = id.clone();
                self.model = model.clone();
            }
            StreamEvent::ContentBlockStart { index, block } => {
                let partial = match block {
                    BlockStart::Text => PartialBlock::Text(String::new()),
                    BlockStart::ToolUse { id, name } => PartialBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        json: String::new(),
                    },
                };
                self.blocks.insert(*index, partial);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                match (self.blocks.get_mut(index), delta) {
                    (Some(PartialBlock::Text(buf)), ContentDelta::TextDelta(text)) => {
                        buf.push_str(text)
                    }
                    (Some(PartialBlock::ToolUse { json, .. }), ContentDelta::InputJsonDelta(part)) => {
                        json.push_str(part)
                    }
                    // Text arriving without an explicit block start.
                    (None, ContentDelta::TextDelta(text)) => {
                        self.blocks.insert(*index, PartialBlock::Text(text.clone()));
                    }
                    _ => {
                        return Err(LlmError::Stream(format!(
                            "delta does not match block {}",
                            index
                        )));
                    }
                }
            }
            StreamEvent::MessageDelta { stop_reason, usage } => {
                self.stop_reason = Some(*stop_reason);
                self.usage.input_tokens = self.usage.input_tokens.max(usage.input_tokens);
                self.usage.output_tokens = self.usage.output_tokens.max(usage.output_tokens);
            }
            StreamEvent::Error { message } => return Err(LlmError::Stream(message.clone())),
            StreamEvent::MessageStop => self.stopped = true,
            StreamEvent::ContentBlockStop { .. } | StreamEvent::Ping => {}
        }
        Ok(())
    }

    /// Whether `MessageStop` has been seen.
    pub fn is_complete(&self) -> bool {
        self.stopped
    }

    /// Finish accumulation and build the response.
    ///
    /// A stream that ended before `MessageStop` was cut off upstream and is
    /// reported as [`LlmError::Stream`] rather than a partial response.
    pub fn finish(self) -> Result<CompletionResponse> {
        if !self.stopped {
            return Err(LlmError::Stream(
                "stream ended before message_stop".to_string(),
            ));
        }
        let mut content = Vec::with_capacity(self.blocks.len());
        for (_, block) in self.blocks {
            match block {
                PartialBlock::Text(text) => content.push(ContentBlock::Text { text }),
                PartialBlock::ToolUse { id, name, json } => {
                    let input = if json.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&json)?
                    };
                    content.push(ContentBlock::ToolUse { id, name, input });
                }
            }
        }

        let has_tool_use = content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
        let stop_reason = self.stop_reason.unwrap_or(if has_tool_use {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        });

        Ok(CompletionResponse::new(
            self.id,
            self.model,
            content,
            stop_reason,
            self.usage,
        ))
    }
}

/// Expand a complete response into the event sequence a streaming provider
/// would have produced for it.
pub fn response_to_events(response: &CompletionResponse) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::MessageStart {
        id: response.id.clone(),
        model: response.model.clone(),
    }];

    for (index, block) in response.content.iter().enumerate() {
        match block {
            ContentBlock::Text { text } => {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    block: BlockStart::Text,
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::TextDelta(text.clone()),
                });
            }
            ContentBlock::ToolUse { id, name, input } => {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    block: BlockStart::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                    },
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta(input.to_string()),
                });
            }
            ContentBlock::ToolResult { .. } => continue,
        }
        events.push(StreamEvent::ContentBlockStop { index });
    }

    events.push(StreamEvent::MessageDelta {
        stop_reason: response.stop_reason.unwrap_or(StopReason::EndTurn),
        usage: response.usage.clone(),
    });
    events.push(StreamEvent::MessageStop);
    events
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A model provider.
///
/// Tools are always passed natively via `request.tools`; responses carry
/// structured `tool_use` blocks.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Run a completion and return the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Stream a completion. The stream ends after `MessageStop` or `Error`.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<ResponseStream>;

    /// Provider name used in logs.
    fn name(&self) -> &str;
}

/// A backend that can be shared across tasks.
pub type SharedBackend = Arc<dyn LlmBackend>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted backend for deterministic agent tests.
///
/// The streaming variant expands each scripted response into text and
/// tool-use block events.
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    responses: Mutex<Vec<CompletionResponse>>,
    request_log: Mutex<Vec<CompletionRequest>>,
    repeat_last: bool,
}

impl MockBackend {
    /// Responses are served in order; a request past the end fails.
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            name: "mock".to_string(),
            responses: Mutex::new(responses),
            request_log: Mutex::new(Vec::new()),
            repeat_last: false,
        }
    }

    /// Create a mock backend that answers every request with the same response.
    pub fn repeating(response: CompletionResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    /// One plain-text answer, then exhausted.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![CompletionResponse::new(
            "mock_msg_1",
            "mock-model",
            vec![ContentBlock::text(text)],
            StopReason::EndTurn,
            Usage::new(10, 20),
        )])
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.request_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Number of requests made so far.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().map(|log| log.len()).unwrap_or(0)
    }

    fn next_response(&self) -> Result<CompletionResponse> {
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| LlmError::Backend("MockBackend: lock poisoned".to_string()))?;
        match responses.len() {
            0 => Err(LlmError::Backend(
                "mock backend exhausted".to_string(),
            )),
            1 if self.repeat_last => Ok(responses[0].clone()),
            _ => Ok(responses.remove(0)),
        }
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        if let Ok(mut log) = self.request_log.lock() {
            log.push(request);
        }
        self.next_response()
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<ResponseStream> {
        let response = self.complete(request).await?;
        let events: Vec<Result<StreamEvent>> =
            response_to_events(&response).into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use futures::StreamExt;

    fn tool_response() -> CompletionResponse {
        CompletionResponse::new(
            "msg_1",
            "model",
            vec![
                ContentBlock::text("Let me check."),
                ContentBlock::tool_use(
                    "tool_1",
                    "sql_query",
                    serde_json::json!({"query": "SELECT 1"}),
                ),
            ],
            StopReason::ToolUse,
            Usage::new(50, 30),
        )
    }

    #[tokio::test]
    async fn test_mock_backend_single_response() {
        let backend = MockBackend::with_text("Hello!");

        let request = CompletionRequest::new("test-model", vec![Message::user("Hi")], 100);
        let response = backend.complete(request).await.unwrap();

        assert_eq!(response.text(), "Hello!");
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_backend_exhausted() {
        let backend = MockBackend::new(vec![]);

        let request = CompletionRequest::new("test-model", vec![Message::user("Hi")], 100);
        assert!(backend.complete(request).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_backend_repeating() {
        let backend = MockBackend::repeating(tool_response());
        for _ in 0..5 {
            let request = CompletionRequest::new("m", vec![Message::user("go")], 100);
            assert!(backend.complete(request).await.unwrap().has_tool_use());
        }
        assert_eq!(backend.request_count(), 5);
    }

    #[tokio::test]
    async fn test_mock_stream_roundtrips_through_accumulator() {
        let backend = MockBackend::new(vec![tool_response()]);
        let request = CompletionRequest::new("m", vec![Message::user("go")], 100);
        let mut stream = backend.complete_stream(request).await.unwrap();

        let mut acc = StreamAccumulator::new();
        let mut saw_tool_start = false;
        while let Some(event) = stream.next().await {
            let event = event.unwrap();
            if matches!(
                &event,
                StreamEvent::ContentBlockStart { block: BlockStart::ToolUse { name, .. }, .. } if name == "sql_query"
            ) {
                saw_tool_start = true;
            }
            acc.push(&event).unwrap();
        }
        assert!(saw_tool_start);

        let response = acc.finish().unwrap();
        assert_eq!(response.text(), "Let me check.");
        let uses = response.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].input["query"], "SELECT 1");
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn test_accumulator_split_json_fragments() {
        let mut acc = StreamAccumulator::new();
        let events = [
            StreamEvent::MessageStart {
                id: "m".into(),
                model: "x".into(),
            },
            StreamEvent::ContentBlockStart {
                index: 0,
                block: BlockStart::ToolUse {
                    id: "t".into(),
                    name: "get_mcp_resource".into(),
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::InputJsonDelta("{\"resource_name\":".into()),
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::InputJsonDelta("\"schema/jettons\"}".into()),
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::MessageStop,
        ];
        for e in &events {
            acc.push(e).unwrap();
        }
        let response = acc.finish().unwrap();
        assert_eq!(
            response.tool_uses()[0].input["resource_name"],
            "schema/jettons"
        );
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn test_accumulator_empty_tool_input_is_object() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamEvent::ContentBlockStart {
            index: 0,
            block: BlockStart::ToolUse {
                id: "t".into(),
                name: "list_mcp_resources".into(),
            },
        })
        .unwrap();
        acc.push(&StreamEvent::MessageStop).unwrap();
        let response = acc.finish().unwrap();
        assert_eq!(response.tool_uses()[0].input, serde_json::json!({}));
    }

    #[test]
    fn test_accumulator_rejects_stream_without_message_stop() {
        let mut acc = StreamAccumulator::new();
        let events = [
            StreamEvent::MessageStart {
                id: "m".into(),
                model: "x".into(),
            },
            StreamEvent::ContentBlockStart {
                index: 0,
                block: BlockStart::Text,
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::TextDelta("You sent 4".into()),
            },
        ];
        for e in &events {
            acc.push(e).unwrap();
        }
        assert!(!acc.is_complete());

        let err = acc.finish().unwrap_err();
        assert!(matches!(err, LlmError::Stream(m) if m.contains("message_stop")));
    }

    #[test]
    fn test_accumulator_error_event() {
        let mut acc = StreamAccumulator::new();
        let err = acc
            .push(&StreamEvent::Error {
                message: "overloaded".into(),
            })
            .unwrap_err();
        assert!(matches!(err, LlmError::Stream(m) if m == "overloaded"));
    }

    #[test]
    fn test_stream_event_is_terminal() {
        assert!(StreamEvent::MessageStop.is_terminal());
        assert!(
            StreamEvent::Error {
                message: "err".to_string()
            }
            .is_terminal()
        );
        assert!(!StreamEvent::Ping.is_terminal());
        assert!(!StreamEvent::ContentBlockStop { index: 0 }.is_terminal());
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_on_non_retryable() {
        let mut calls = 0;
        let result: Result<()> = with_retry(3, Duration::from_millis(1), "test", || {
            calls += 1;
            async { Err(LlmError::Auth("nope".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_with_retry_retries_network_errors() {
        let mut calls = 0;
        let result: Result<u32> = with_retry(2, Duration::from_millis(1), "test", || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err(LlmError::Network("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }
}
