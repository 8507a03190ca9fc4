//! Chat metadata upserts and listings.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use crate::error::Result;
use crate::types::Chat;

use super::{SqliteStore, format_ts, parse_ts};

const CHAT_COLUMNS: &str = "chat_id, user_id, title, job_id, created_at, updated_at";

impl SqliteStore {
    /// Create or update a chat.
    ///
    /// `created_at` is set on first save and preserved afterwards. A `None`
    /// job id keeps whatever job the chat was already bound to.
    pub fn save_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        title: &str,
        job_id: Option<&str>,
    ) -> Result<Chat> {
        let now = format_ts(&Utc::now());
        {
            let conn = self.conn.lock();
            conn.execute(
                r#"
                INSERT INTO chats (chat_id, user_id, title, job_id, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                ON CONFLICT(chat_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    title = excluded.title,
                    job_id = COALESCE(excluded.job_id, chats.job_id),
                    updated_at = excluded.updated_at
                "#,
                params![chat_id, user_id, title, job_id, now],
            )?;
        }

        debug!(chat_id, user_id, "Chat saved");
        self.get_chat(chat_id)?
            .ok_or_else(|| crate::StoreError::NotFound(format!("Chat {chat_id}")))
    }

    /// Get a chat by id.
    pub fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE chat_id = ?1"),
                params![chat_id],
                RawChat::from_row,
            )
            .optional()?;

        raw.map(RawChat::into_chat).transpose()
    }

    /// A user's chats, most recently updated first.
    pub fn list_user_chats(&self, user_id: &str, limit: usize, offset: usize) -> Result<Vec<Chat>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {CHAT_COLUMNS} FROM chats
            WHERE user_id = ?1
            ORDER BY updated_at DESC
            LIMIT ?2 OFFSET ?3
            "#
        ))?;

        let rows = stmt.query_map(params![user_id, limit as i64, offset as i64], RawChat::from_row)?;

        let mut chats = Vec::new();
        for raw in rows {
            chats.push(raw?.into_chat()?);
        }
        Ok(chats)
    }
}

struct RawChat {
    chat_id: String,
    user_id: String,
    title: String,
    job_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawChat {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chat_id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            job_id: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_chat(self) -> Result<Chat> {
        Ok(Chat {
            chat_id: self.chat_id,
            user_id: self.user_id,
            title: self.title,
            job_id: self.job_id,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_chat_preserves_created_at() {
        let store = SqliteStore::open_in_memory().unwrap();

        let first = store.save_chat("u1", "c1", "Wallet summary", Some("J1")).unwrap();
        let second = store.save_chat("u1", "c1", "Renamed", None).unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.title, "Renamed");
        assert_eq!(second.job_id.as_deref(), Some("J1"));
    }

    #[test]
    fn test_get_missing_chat() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_chat("nope").unwrap().is_none());
    }

    #[test]
    fn test_list_user_chats_newest_first_with_paging() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tick = || std::thread::sleep(std::time::Duration::from_millis(2));
        store.save_chat("u1", "a", "A", None).unwrap();
        tick();
        store.save_chat("u1", "b", "B", None).unwrap();
        store.save_chat("u2", "x", "X", None).unwrap();
        tick();
        // Touch `a` so it becomes the most recent.
        store.save_chat("u1", "a", "A again", None).unwrap();

        let chats = store.list_user_chats("u1", 10, 0).unwrap();
        let ids: Vec<_> = chats.iter().map(|c| c.chat_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let page = store.list_user_chats("u1", 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].chat_id, "b");
    }
}
