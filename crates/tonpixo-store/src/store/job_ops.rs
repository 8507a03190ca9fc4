//! Job metadata.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::backend::JobDirectory;
use crate::error::Result;

use super::{SqliteStore, format_ts};

impl SqliteStore {
    /// Record (or replace) the wallet address a job was ingested for.
    pub fn register_job(&self, job_id: &str, address: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO jobs (job_id, address, created_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(job_id) DO UPDATE SET address = excluded.address
            "#,
            params![job_id, address, format_ts(&Utc::now())],
        )?;
        debug!(job_id, "Job registered");
        Ok(())
    }

    /// Wallet address for a job. Blank stored addresses read as `None`.
    pub fn wallet_address(&self, job_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let address: Option<String> = conn
            .query_row(
                "SELECT address FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(address.filter(|a| !a.trim().is_empty()))
    }
}

impl JobDirectory for SqliteStore {
    fn wallet_address(&self, job_id: &str) -> Result<Option<String>> {
        SqliteStore::wallet_address(self, job_id)
    }
}
