//! Persistence for Tonpixo conversations.
//!
//! Stores conversation turns, chat metadata and job metadata in a single
//! SQLite file.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SqliteStore                                                            │
//! │  - Single SQLite file with WAL mode                                     │
//! │  - messages: turns + idempotency guard records                          │
//! │  - chats: per-user chat metadata                                        │
//! │  - jobs: job id → wallet address                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!          ▲                              ▲
//!          │ TurnStore                    │ JobDirectory
//!     history + service              system prompt rendering
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tonpixo_store::{NewTurn, Role, SqliteStore};
//!
//! let store = SqliteStore::open("/var/lib/tonpixo/tonpixo.db")?;
//! let turn = NewTurn::new("chat-1", Role::User, "What did I spend last week?")
//!     .with_idempotency_key(Some("req-42"));
//! let id = store.append_turn(&turn)?;
//! // Replaying the same request returns the same turn.
//! assert_eq!(store.append_turn(&turn)?, id);
//! # Ok::<(), tonpixo_store::StoreError>(())
//! ```

pub mod backend;
pub mod error;
pub mod store;
pub mod types;

pub use backend::{JobDirectory, SharedJobDirectory, SharedTurnStore, TurnStore};
pub use error::{Result, StoreError};
pub use store::SqliteStore;
pub use types::{Chat, NewTurn, Role, Turn, TurnId};
