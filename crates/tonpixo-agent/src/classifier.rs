//! Stream classification.
//!
//! Text produced before or between tool calls is reasoning; only text after
//! the last tool call completes is the answer. Because that is only known in
//! hindsight, text is buffered until a later event settles its label.
//!
//! ```text
//!   token a ──► buffer [a]
//!   tool_start t ──► thinking a, tool_start t      (buffer flushed)
//!   token b ──► thinking b                         (tool still pending)
//!   tool_end t ──► tool_end t
//!   token c ──► buffer [c]
//!   end ──► token c
//! ```

use serde::{Deserialize, Serialize};

use crate::stream::AgentEvent;

/// An event as delivered to stream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifiedEvent {
    /// Intermediate model text.
    Thinking { content: String },
    /// Final-answer text.
    Token { content: String },
    ToolStart { tool: String },
    ToolEnd { tool: String },
    TraceId { content: String },
    Done,
    Error { content: String },
}

impl ClassifiedEvent {
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::Thinking {
            content: content.into(),
        }
    }

    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    /// True for the events that end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Per-stream relabeling state.
#[derive(Debug, Default)]
pub struct StreamClassifier {
    tools_used: bool,
    pending_tools: usize,
    buffer: Vec<String>,
}

impl StreamClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_token(&mut self, text: &str) -> Vec<ClassifiedEvent> {
        if text.is_empty() {
            return Vec::new();
        }
        if self.tools_used && self.pending_tools > 0 {
            return vec![ClassifiedEvent::thinking(text)];
        }
        self.buffer.push(text.to_string());
        Vec::new()
    }

    pub fn on_tool_start(&mut self, name: &str) -> Vec<ClassifiedEvent> {
        self.tools_used = true;
        self.pending_tools += 1;

        let mut out: Vec<ClassifiedEvent> = self
            .buffer
            .drain(..)
            .map(ClassifiedEvent::thinking)
            .collect();
        out.push(ClassifiedEvent::ToolStart {
            tool: name.to_string(),
        });
        out
    }

    pub fn on_tool_end(&mut self, name: &str) -> Vec<ClassifiedEvent> {
        self.pending_tools = self.pending_tools.saturating_sub(1);
        vec![ClassifiedEvent::ToolEnd {
            tool: name.to_string(),
        }]
    }

    /// Flush whatever is still buffered as final-answer tokens.
    pub fn finish(&mut self) -> Vec<ClassifiedEvent> {
        self.buffer.drain(..).map(ClassifiedEvent::token).collect()
    }

    /// Route one raw run event. Completion produces nothing; the caller
    /// decides how the stream ends.
    pub fn classify(&mut self, event: &AgentEvent) -> Vec<ClassifiedEvent> {
        match event {
            AgentEvent::Token { text } => self.on_token(text),
            AgentEvent::ToolStart { name, .. } => self.on_tool_start(name),
            AgentEvent::ToolEnd { name, .. } => self.on_tool_end(name),
            AgentEvent::Completed { .. } => Vec::new(),
        }
    }
}
