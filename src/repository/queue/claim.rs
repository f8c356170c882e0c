//! Item claiming: the one atomic primitive all workers coordinate through.

use chrono::Utc;
use rusqlite::params;

use super::helpers::row_to_item;
use super::{QueueRepository, Result};
use crate::models::{ItemState, QueueItem};

impl QueueRepository {
    /// Atomically claim the next eligible item for a worker.
    ///
    /// Eligible means pending, or failed_retry whose backoff has elapsed.
    /// Selection is highest priority first, FIFO by enqueue time within a
    /// tier. Uses `BEGIN IMMEDIATE` so no two callers can ever receive the
    /// same item, across threads or processes.
    pub fn claim_next(&self, worker_id: &str) -> Result<Option<QueueItem>> {
        let conn = self.connect()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<Option<QueueItem>> = (|| {
            let now = Utc::now();
            let query_result = conn.query_row(
                r#"
                SELECT * FROM queue_items
                WHERE state = 'pending'
                OR (state = 'failed_retry'
                    AND (next_retry_at IS NULL OR next_retry_at <= ?1))
                ORDER BY priority ASC, enqueued_at ASC
                LIMIT 1
                "#,
                params![now.to_rfc3339()],
                row_to_item,
            );

            match query_result {
                Ok(mut item) => {
                    let token = uuid::Uuid::new_v4().to_string();
                    conn.execute(
                        r#"
                        UPDATE queue_items
                        SET state = 'processing',
                            claim_token = ?1,
                            claimed_by = ?2,
                            last_attempt_at = ?3,
                            next_retry_at = NULL
                        WHERE id = ?4
                        "#,
                        params![token, worker_id, now.to_rfc3339(), item.id],
                    )?;
                    item.state = ItemState::Processing;
                    item.claim_token = Some(token);
                    item.claimed_by = Some(worker_id.to_string());
                    item.last_attempt_at = Some(now);
                    item.next_retry_at = None;
                    Ok(Some(item))
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }

        result
    }
}
