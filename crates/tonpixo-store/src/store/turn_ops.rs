//! Conversation turn writes and reads.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, Transaction, params};
use tracing::{debug, warn};

use crate::backend::TurnStore;
use crate::error::{Result, StoreError};
use crate::types::{NewTurn, Role, Turn, TurnId};

use super::{SqliteStore, format_ts, parse_ts};

const GUARD_PREFIX: &str = "idem#";

const TURN_COLUMNS: &str = "message_id, chat_id, role, content, trace_id, created_at";

impl SqliteStore {
    /// Append a turn; see [`TurnStore::append_turn`].
    pub fn append_turn(&self, turn: &NewTurn<'_>) -> Result<TurnId> {
        let id = TurnId::new();
        let mut conn = self.conn.lock();

        let Some(key) = turn.idempotency_key else {
            conn.execute(
                r#"
                INSERT INTO messages (chat_id, message_id, record_type, role, content, trace_id, created_at)
                VALUES (?1, ?2, 'turn', ?3, ?4, ?5, ?6)
                "#,
                params![
                    turn.chat_id,
                    id.to_string(),
                    turn.role.as_str(),
                    turn.content,
                    turn.trace_id,
                    format_ts(&Utc::now()),
                ],
            )?;
            debug!(chat_id = turn.chat_id, turn_id = %id, role = %turn.role, "Turn appended");
            return Ok(id);
        };

        let guard_id = format!("{GUARD_PREFIX}{key}");

        let collided = {
            let tx = conn.transaction()?;
            match insert_guarded(&tx, turn, id, &guard_id) {
                Ok(()) => {
                    tx.commit()?;
                    false
                }
                // Dropping the transaction rolls it back.
                Err(err) if err.is_unique_violation() => true,
                Err(err) => return Err(err),
            }
        };

        if !collided {
            debug!(chat_id = turn.chat_id, turn_id = %id, key, "Turn appended with idempotency guard");
            return Ok(id);
        }

        let existing: Option<String> = conn
            .query_row(
                r#"
                SELECT ref_turn_id FROM messages
                WHERE chat_id = ?1 AND message_id = ?2 AND record_type = 'guard'
                "#,
                params![turn.chat_id, guard_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let existing = existing.ok_or_else(|| {
            StoreError::invalid_data(format!("idempotency guard {guard_id} has no turn reference"))
        })?;

        debug!(chat_id = turn.chat_id, key, turn_id = %existing, "Idempotent replay, returning existing turn");
        TurnId::parse(&existing)
    }

    /// The newest `limit` turns of a chat, oldest first.
    pub fn list_recent(&self, chat_id: &str, limit: usize) -> Result<Vec<Turn>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {TURN_COLUMNS} FROM messages
            WHERE chat_id = ?1 AND record_type = 'turn'
            ORDER BY created_at DESC, seq DESC
            LIMIT ?2
            "#
        ))?;

        let mut rows = stmt.query(params![chat_id, limit as i64])?;
        let mut turns = Vec::new();
        while let Some(row) = rows.next()? {
            turns.extend(row_to_turn(row)?);
        }
        turns.reverse();
        Ok(turns)
    }

    /// Every turn of a chat, oldest first.
    pub fn list_all(&self, chat_id: &str) -> Result<Vec<Turn>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {TURN_COLUMNS} FROM messages
            WHERE chat_id = ?1 AND record_type = 'turn'
            ORDER BY created_at ASC, seq ASC
            "#
        ))?;

        let mut rows = stmt.query(params![chat_id])?;
        let mut turns = Vec::new();
        while let Some(row) = rows.next()? {
            turns.extend(row_to_turn(row)?);
        }
        Ok(turns)
    }
}

fn insert_guarded(tx: &Transaction<'_>, turn: &NewTurn<'_>, id: TurnId, guard_id: &str) -> Result<()> {
    let now = format_ts(&Utc::now());

    tx.execute(
        r#"
        INSERT INTO messages (chat_id, message_id, record_type, ref_turn_id, created_at)
        VALUES (?1, ?2, 'guard', ?3, ?4)
        "#,
        params![turn.chat_id, guard_id, id.to_string(), now],
    )?;

    tx.execute(
        r#"
        INSERT INTO messages (chat_id, message_id, record_type, role, content, trace_id, created_at)
        VALUES (?1, ?2, 'turn', ?3, ?4, ?5, ?6)
        "#,
        params![
            turn.chat_id,
            id.to_string(),
            turn.role.as_str(),
            turn.content,
            turn.trace_id,
            now,
        ],
    )?;

    Ok(())
}

/// Rows with a missing or unknown role are skipped rather than failing the read.
fn row_to_turn(row: &Row<'_>) -> Result<Option<Turn>> {
    let id: String = row.get(0)?;
    let role: Option<String> = row.get(2)?;
    let created_at: String = row.get(5)?;

    let Some(role) = role.as_deref().and_then(|r| r.parse::<Role>().ok()) else {
        warn!(turn_id = %id, role = ?role, "Skipping turn with unknown role");
        return Ok(None);
    };

    Ok(Some(Turn {
        id: TurnId::parse(&id)?,
        chat_id: row.get(1)?,
        role,
        content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        trace_id: row.get(4)?,
        created_at: parse_ts(&created_at)?,
    }))
}

impl TurnStore for SqliteStore {
    fn append_turn(&self, turn: &NewTurn<'_>) -> Result<TurnId> {
        SqliteStore::append_turn(self, turn)
    }

    fn list_recent(&self, chat_id: &str, limit: usize) -> Result<Vec<Turn>> {
        SqliteStore::list_recent(self, chat_id, limit)
    }

    fn list_all(&self, chat_id: &str) -> Result<Vec<Turn>> {
        SqliteStore::list_all(self, chat_id)
    }
}
