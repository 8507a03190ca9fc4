//! SQLite-backed store.
//!
//! One database file holds three tables:
//!
//! ```text
//! messages  seq | chat_id | message_id | record_type | role | content | trace_id | ref_turn_id | created_at
//!           record_type = 'turn'  → a conversation turn (message_id = turn id)
//!           record_type = 'guard' → idempotency sentinel (message_id = "idem#<key>",
//!                                   ref_turn_id = the turn it guards)
//!           UNIQUE(chat_id, message_id)
//!
//! chats     chat_id | user_id | title | job_id | created_at | updated_at
//! jobs      job_id  | address | created_at
//! ```
//!
//! Read paths over `messages` always filter on `record_type = 'turn'`.

mod chat_ops;
mod job_ops;
mod turn_ops;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// Current schema version.
const SCHEMA_VERSION: i32 = 1;

/// SQLite store for turns, chats and job metadata.
///
/// The connection is guarded by a mutex so the store can be shared behind an
/// `Arc` across tasks.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(rusqlite::Error::InvalidPath(
                    format!("Failed to create directory {}: {}", parent.display(), e).into(),
                ))
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize(true)?;

        info!(path = %path.display(), "Store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize(false)?;

        debug!("In-memory store opened");
        Ok(store)
    }

    fn initialize(&self, wal: bool) -> Result<()> {
        let conn = self.conn.lock();

        if wal {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }

        Self::migrate(&conn)
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if current > SCHEMA_VERSION {
            return Err(StoreError::Migration(format!(
                "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
        if current == SCHEMA_VERSION {
            debug!(version = current, "Schema up to date");
            return Ok(());
        }

        info!(from = current, to = SCHEMA_VERSION, "Migrating schema");

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                record_type TEXT NOT NULL DEFAULT 'turn',
                role TEXT,
                content TEXT,
                trace_id TEXT,
                ref_turn_id TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (chat_id, message_id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat_created
                ON messages(chat_id, record_type, created_at);

            CREATE TABLE IF NOT EXISTS chats (
                chat_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                job_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chats_user_updated
                ON chats(user_id, updated_at);

            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!(version = SCHEMA_VERSION, "Schema created");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timestamp helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 so lexical order matches chronological order.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::invalid_data(format!("bad timestamp '{s}': {e}")))
}
