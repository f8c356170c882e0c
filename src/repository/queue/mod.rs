//! Work queue repository: the single source of truth for pipeline state.

mod claim;
mod helpers;
mod stats;
mod transitions;

pub use transitions::RetryPolicy;

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};

use super::{to_option, Result};
use crate::models::{NewItem, QueueItem};
use helpers::row_to_item;

/// SQLite-backed repository for queue items.
///
/// Opens a short-lived connection per operation; multi-worker exclusivity
/// comes from `BEGIN IMMEDIATE` transactions, not in-process locks.
#[derive(Clone)]
pub struct QueueRepository {
    db_path: PathBuf,
}

impl QueueRepository {
    /// Create the repository and ensure the schema exists.
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            -- Accepted input files and their pipeline state
            CREATE TABLE IF NOT EXISTS queue_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_path TEXT NOT NULL UNIQUE,
                origin_path TEXT,
                fingerprint TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 1,
                state TEXT NOT NULL DEFAULT 'pending',

                -- Retry tracking
                attempt_count INTEGER NOT NULL DEFAULT 0,
                next_retry_at TEXT,
                error_message TEXT,

                -- Timing
                enqueued_at TEXT NOT NULL,
                last_attempt_at TEXT,
                completed_at TEXT,

                -- Claim ownership
                claim_token TEXT,
                claimed_by TEXT
            );

            -- Claim selection order: state, then priority, then FIFO
            CREATE INDEX IF NOT EXISTS idx_queue_items_claim
                ON queue_items(state, priority, enqueued_at);
            CREATE INDEX IF NOT EXISTS idx_queue_items_fingerprint
                ON queue_items(fingerprint);
            CREATE INDEX IF NOT EXISTS idx_queue_items_retry
                ON queue_items(next_retry_at) WHERE state = 'failed_retry';
        "#,
        )?;
        Ok(())
    }

    /// Insert a new pending item.
    ///
    /// Fails with `DuplicateItem` if an item for the same source path or the
    /// same content fingerprint is already pending or in flight, so a re-drop
    /// of the same file never produces a second work unit.
    pub fn enqueue(&self, item: &NewItem) -> Result<i64> {
        let conn = self.connect()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<i64> = (|| {
            let source_path = item.source_path.to_string_lossy();
            let active: i64 = conn.query_row(
                r#"
                SELECT COUNT(*) FROM queue_items
                WHERE state IN ('pending', 'processing', 'failed_retry')
                AND (source_path = ?1 OR fingerprint = ?2)
                "#,
                params![source_path, item.fingerprint],
                |row| row.get(0),
            )?;

            if active > 0 {
                return Err(super::RepositoryError::DuplicateItem(
                    source_path.into_owned(),
                ));
            }

            conn.execute(
                r#"
                INSERT INTO queue_items (
                    source_path, origin_path, fingerprint, priority,
                    state, attempt_count, enqueued_at
                ) VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5)
                "#,
                params![
                    source_path,
                    item.origin_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                    item.fingerprint,
                    item.priority.as_i32(),
                    Utc::now().to_rfc3339(),
                ],
            )?;

            Ok(conn.last_insert_rowid())
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }

        result
    }

    /// Fetch a single item by id.
    pub fn get_item(&self, id: i64) -> Result<Option<QueueItem>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM queue_items WHERE id = ?")?;
        to_option(stmt.query_row(params![id], row_to_item))
    }

    /// Delete done items older than the given number of days.
    /// Retention is an operator decision; this only runs from the CLI.
    pub fn cleanup_done(&self, days: u32) -> Result<usize> {
        let conn = self.connect()?;
        let cutoff = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let removed = conn.execute(
            "DELETE FROM queue_items WHERE state = 'done' AND completed_at < ?",
            params![cutoff],
        )?;
        Ok(removed)
    }
}
