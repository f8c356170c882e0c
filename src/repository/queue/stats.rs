//! Queue statistics and listings for the status surface.

use std::collections::HashMap;

use rusqlite::params;

use super::helpers::row_to_item;
use super::{QueueRepository, Result};
use crate::models::{QueueItem, QueueStats};

impl QueueRepository {
    /// Per-state item counts.
    pub fn queue_status(&self) -> Result<QueueStats> {
        let conn = self.connect()?;

        let mut counts: HashMap<String, u64> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                r#"
                SELECT state, COUNT(*) as count
                FROM queue_items
                GROUP BY state
            "#,
            )?;

            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?;

            for row in rows {
                let (state, count) = row?;
                counts.insert(state, count);
            }
        }

        Ok(QueueStats {
            pending: *counts.get("pending").unwrap_or(&0),
            processing: *counts.get("processing").unwrap_or(&0),
            done: *counts.get("done").unwrap_or(&0),
            failed_retry: *counts.get("failed_retry").unwrap_or(&0),
            dead: *counts.get("dead").unwrap_or(&0),
        })
    }

    /// Dead items with their recorded errors, newest first.
    pub fn list_dead(&self, limit: u32) -> Result<Vec<QueueItem>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM queue_items
            WHERE state = 'dead'
            ORDER BY last_attempt_at DESC
            LIMIT ?
        "#,
        )?;

        let items = stmt
            .query_map(params![limit], row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }
}
