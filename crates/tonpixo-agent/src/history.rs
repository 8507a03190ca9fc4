//! Conversation history loading and bounding.
//!
//! Prior turns are fetched from the [`TurnStore`] and squeezed into three
//! budgets before they reach the model:
//!
//! ```text
//! fetch K turns ─► drop empty / dedupe question ─► truncate each message
//!       ─► keep last N messages ─► walk newest→oldest within B chars
//! ```
//!
//! All lengths are counted in `char`s.

use tonpixo_config::HistoryConfig;
use tonpixo_llm::Message;
use tonpixo_store::{Role, TurnStore};

/// Marker appended to truncated history messages and questions.
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Budgets applied to loaded history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    /// Turns fetched from storage; 0 disables history.
    pub fetch_limit: usize,
    /// Messages kept; 0 means no count cap.
    pub max_messages: usize,
    /// Aggregate character budget.
    pub max_chars: usize,
    /// Per-message character budget.
    pub message_max_chars: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self::from(&HistoryConfig::default())
    }
}

impl From<&HistoryConfig> for HistoryLimits {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            fetch_limit: config.fetch_limit,
            max_messages: config.max_messages,
            max_chars: config.max_chars,
            message_max_chars: config.message_max_chars,
        }
    }
}

/// One prior message, ready to be sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub role: Role,
    pub text: String,
}

impl HistoryMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn to_message(&self) -> Message {
        match self.role {
            Role::User => Message::user(&self.text),
            Role::Agent => Message::assistant(&self.text),
        }
    }

    fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Trim `text` and cut it to `max_chars` characters, marking the cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let compact = text.trim();
    match compact.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &compact[..cut], TRUNCATION_MARKER),
        None => compact.to_string(),
    }
}

/// Apply the per-message, count and aggregate budgets.
pub fn trim_history(messages: Vec<HistoryMessage>, limits: &HistoryLimits) -> Vec<HistoryMessage> {
    let mut trimmed: Vec<HistoryMessage> = messages
        .into_iter()
        .filter_map(|m| {
            let text = truncate_text(&m.text, limits.message_max_chars);
            (!text.is_empty()).then(|| HistoryMessage::new(m.role, text))
        })
        .collect();

    if limits.max_messages > 0 && trimmed.len() > limits.max_messages {
        trimmed.drain(..trimmed.len() - limits.max_messages);
    }

    let mut budget = limits.max_chars;
    let mut kept = Vec::with_capacity(trimmed.len());
    for message in trimmed.into_iter().rev() {
        let cost = message.char_len();
        if cost <= budget {
            budget -= cost;
            kept.push(message);
            continue;
        }
        if !kept.is_empty() {
            continue;
        }
        // Nothing fits yet: keep a cut-down newest message and stop.
        let text = truncate_text(&message.text, budget);
        kept.push(HistoryMessage::new(message.role, text));
        break;
    }

    kept.reverse();
    kept
}

/// Load bounded history for `chat_id`.
///
/// `question` is the already-prepared current question; a trailing user turn
/// with identical text is dropped so the question is not sent twice. Fetch
/// failures are logged and yield no history.
pub fn load_history(
    store: Option<&dyn TurnStore>,
    chat_id: Option<&str>,
    question: &str,
    limits: &HistoryLimits,
) -> Vec<HistoryMessage> {
    let (Some(store), Some(chat_id)) = (store, chat_id) else {
        return Vec::new();
    };
    if limits.fetch_limit == 0 {
        return Vec::new();
    }

    let turns = match store.list_recent(chat_id, limits.fetch_limit) {
        Ok(turns) => turns,
        Err(e) => {
            tracing::error!(%chat_id, error = %e, "Error loading chat history");
            return Vec::new();
        }
    };

    let mut history: Vec<HistoryMessage> = turns
        .into_iter()
        .filter(|t| !t.content.is_empty())
        .map(|t| HistoryMessage::new(t.role, t.content))
        .collect();

    if history
        .last()
        .is_some_and(|m| m.role == Role::User && m.text == question)
    {
        history.pop();
    }

    let fetched = history.len();
    let history = trim_history(history, limits);
    tracing::debug!(%chat_id, fetched, kept = history.len(), "History loaded");
    history
}
