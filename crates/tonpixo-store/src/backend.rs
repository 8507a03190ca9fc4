//! Storage traits consumed by the agent service.
//!
//! The agent only needs three things from persistence: append a turn
//! (optionally idempotent), read recent turns, and look up a job's wallet
//! address. [`SqliteStore`](crate::SqliteStore) implements both traits; tests
//! substitute in-memory fakes.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{NewTurn, Turn, TurnId};

/// Append-only conversation turn storage.
pub trait TurnStore: Send + Sync {
    /// Append a turn.
    ///
    /// With an idempotency key, at most one turn is ever written per
    /// `(chat_id, key)`; repeated calls return the first turn's id.
    fn append_turn(&self, turn: &NewTurn<'_>) -> Result<TurnId>;

    /// The newest `limit` turns of a chat, returned oldest first.
    fn list_recent(&self, chat_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// Every turn of a chat, oldest first.
    fn list_all(&self, chat_id: &str) -> Result<Vec<Turn>>;
}

/// Read access to job metadata.
pub trait JobDirectory: Send + Sync {
    /// Wallet address registered for a job, if any.
    fn wallet_address(&self, job_id: &str) -> Result<Option<String>>;
}

pub type SharedTurnStore = Arc<dyn TurnStore>;
pub type SharedJobDirectory = Arc<dyn JobDirectory>;
