//! Anthropic Messages API backend.
//!
//! Supports plain and streamed completions with native tool calling. The SSE
//! framing is decoded incrementally by [`SseDecoder`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, header};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use crate::backend::{
    BlockStart, ContentDelta, LlmBackend, ResponseStream, StreamEvent, with_retry,
};
use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, ContentBlock, StopReason, Usage};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
    pub timeout: Duration,
    /// Maximum retries for transient errors.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl AnthropicConfig {
    /// Create a new config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Read the API key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            LlmError::Config("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Anthropic API backend.
pub struct AnthropicBackend {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicBackend {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn post_messages(&self, request: &CompletionRequest) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header(header::CONTENT_TYPE, "application/json")
            .json(request)
    }

    async fn error_from_response(response: Response) -> LlmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));
        LlmError::from_status(status.as_u16(), message)
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut request = request;
        request.stream = false;

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            "anthropic",
            || async {
                let response = self.post_messages(&request).send().await?;
                if !response.status().is_success() {
                    return Err(Self::error_from_response(response).await);
                }
                let parsed: ApiResponse = serde_json::from_str(&response.text().await?)?;
                Ok(parsed.into())
            },
        )
        .await
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<ResponseStream> {
        let mut request = request;
        request.stream = true;

        let response = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            "anthropic",
            || async {
                let response = self.post_messages(&request).send().await?;
                if response.status().is_success() {
                    Ok(response)
                } else {
                    Err(Self::error_from_response(response).await)
                }
            },
        )
        .await?;

        Ok(sse_event_stream(response.bytes_stream()))
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Incremental decoder for `event:` / `data:` framed server-sent events.
///
/// Lines are split on raw bytes before decoding, so a multi-byte character
/// cut across two network chunks is reassembled intact.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
}

impl SseDecoder {
    /// Feed a chunk and return every complete `(event, data)` frame it closes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<(String, String)> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                self.event = None;
            } else if let Some(name) = line.strip_prefix("event:") {
                self.event = Some(name.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                if let Some(event) = &self.event {
                    frames.push((event.clone(), data.trim().to_string()));
                }
            }
        }
        frames
    }
}

struct SseState {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    done: bool,
}

fn sse_event_stream(
    bytes: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> ResponseStream {
    let state = SseState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                if event.is_terminal() {
                    state.done = true;
                    state.pending.clear();
                }
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for (name, data) in state.decoder.feed(&chunk) {
                        if let Some(event) = parse_frame(&name, &data) {
                            state.pending.push_back(event);
                        }
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(LlmError::Network(e.to_string())), state));
                }
                None => {
                    state.done = true;
                    return Some((
                        Err(LlmError::Stream(
                            "stream ended before message_stop".to_string(),
                        )),
                        state,
                    ));
                }
            }
        }
    }))
}

/// Map one SSE frame to a [`StreamEvent`]. Unknown or malformed frames are skipped.
pub fn parse_frame(name: &str, data: &str) -> Option<StreamEvent> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let index = || value["index"].as_u64().map(|i| i as usize);

    match name {
        "message_start" => Some(StreamEvent::MessageStart {
            id: value["message"]["id"].as_str()?.to_string(),
            model: value["message"]["model"].as_str()?.to_string(),
        }),
        "content_block_start" => {
            let block = &value["content_block"];
            let start = match block["type"].as_str()? {
                "tool_use" => BlockStart::ToolUse {
                    id: block["id"].as_str()?.to_string(),
                    name: block["name"].as_str()?.to_string(),
                },
                _ => BlockStart::Text,
            };
            Some(StreamEvent::ContentBlockStart {
                index: index()?,
                block: start,
            })
        }
        "content_block_delta" => {
            let delta = &value["delta"];
            let delta = match delta["type"].as_str()? {
                "text_delta" => ContentDelta::TextDelta(delta["text"].as_str()?.to_string()),
                "input_json_delta" => {
                    ContentDelta::InputJsonDelta(delta["partial_json"].as_str()?.to_string())
                }
                _ => return None,
            };
            Some(StreamEvent::ContentBlockDelta {
                index: index()?,
                delta,
            })
        }
        "content_block_stop" => Some(StreamEvent::ContentBlockStop { index: index()? }),
        "message_delta" => Some(StreamEvent::MessageDelta {
            stop_reason: StopReason::parse(value["delta"]["stop_reason"].as_str().unwrap_or("")),
            usage: Usage::new(0, value["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32),
        }),
        "message_stop" => Some(StreamEvent::MessageStop),
        "ping" => Some(StreamEvent::Ping),
        "error" => Some(StreamEvent::Error {
            message: value["error"]["message"]
                .as_str()
                .unwrap_or("Unknown streaming error")
                .to_string(),
        }),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct ApiResponse {
    id: String,
    content: Vec<ApiContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

impl From<ApiResponse> for CompletionResponse {
    fn from(api: ApiResponse) -> Self {
        let content = api
            .content
            .into_iter()
            .filter_map(|block| match block {
                ApiContentBlock::Text { text } => Some(ContentBlock::Text { text }),
                ApiContentBlock::ToolUse { id, name, input } => {
                    Some(ContentBlock::ToolUse { id, name, input })
                }
                ApiContentBlock::Other => None,
            })
            .collect();

        CompletionResponse {
            id: api.id,
            content,
            model: api.model,
            stop_reason: api.stop_reason.as_deref().map(StopReason::parse),
            usage: api.usage,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, serde::Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_decoder_handles_split_frames() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"event: ping\nda").is_empty());
        let frames = decoder.feed(b"ta: {\"type\":\"ping\"}\n\n");
        assert_eq!(frames, vec![("ping".to_string(), "{\"type\":\"ping\"}".to_string())]);
    }

    fn frame(text: &str) -> String {
        format!(
            "event: content_block_delta\ndata: {{\"index\":0,\"delta\":{{\"type\":\"text_delta\",\"text\":\"{text}\"}}}}\n\n"
        )
    }

    fn chunks(parts: Vec<Vec<u8>>) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static {
        futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let body = frame("ё").into_bytes();
        let cut = body.iter().position(|b| *b == 0xD1).unwrap() + 1;
        let mut stream = sse_event_stream(chunks(vec![
            body[..cut].to_vec(),
            body[cut..].to_vec(),
            b"event: message_stop\ndata: {}\n\n".to_vec(),
        ]));

        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(
            first,
            StreamEvent::ContentBlockDelta { delta: ContentDelta::TextDelta(t), .. } if t == "ё"
        ));
        assert_eq!(stream.next().await.unwrap().unwrap(), StreamEvent::MessageStop);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_cut_before_message_stop_is_error() {
        let mut stream = sse_event_stream(chunks(vec![frame("You sent 4").into_bytes()]));

        assert!(matches!(
            stream.next().await,
            Some(Ok(StreamEvent::ContentBlockDelta { .. }))
        ));
        assert!(matches!(
            stream.next().await,
            Some(Err(LlmError::Stream(m))) if m.contains("message_stop")
        ));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_parse_tool_use_block_start() {
        let event = parse_frame(
            "content_block_start",
            r#"{"index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"sql_query","input":{}}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::ContentBlockStart {
                index: 1,
                block: BlockStart::ToolUse {
                    id: "toolu_1".into(),
                    name: "sql_query".into()
                }
            }
        );
    }

    #[test]
    fn test_parse_deltas() {
        let text = parse_frame(
            "content_block_delta",
            r#"{"index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        );
        assert!(matches!(
            text,
            Some(StreamEvent::ContentBlockDelta { delta: ContentDelta::TextDelta(t), .. }) if t == "Hi"
        ));

        let json = parse_frame(
            "content_block_delta",
            r#"{"index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q"}}"#,
        );
        assert!(matches!(
            json,
            Some(StreamEvent::ContentBlockDelta { delta: ContentDelta::InputJsonDelta(_), index: 1 })
        ));
    }

    #[test]
    fn test_parse_message_delta_and_unknown() {
        let event = parse_frame(
            "message_delta",
            r#"{"delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::MessageDelta {
                stop_reason: StopReason::ToolUse,
                usage: Usage::new(0, 12)
            }
        );
        assert!(parse_frame("mystery", "{}").is_none());
        assert!(parse_frame("ping", "not json").is_none());
    }

    #[test]
    fn test_api_response_conversion() {
        let api: ApiResponse = serde_json::from_str(
            r#"{"id":"msg_1","type":"message","role":"assistant","model":"claude",
                "content":[{"type":"text","text":"ok"},{"type":"tool_use","id":"t","name":"sql_query","input":{"query":"SELECT 1"}}],
                "stop_reason":"tool_use","usage":{"input_tokens":3,"output_tokens":4}}"#,
        )
        .unwrap();
        let response: CompletionResponse = api.into();
        assert!(response.has_tool_use());
        assert_eq!(response.text(), "ok");
        assert_eq!(response.usage.total(), 7);
    }
}
