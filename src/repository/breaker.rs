//! Durable storage for the circuit breaker record.
//!
//! A single row, updated on every state transition, so a restart resumes
//! the breaker where the previous process left it.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};

use super::{parse_datetime_opt, to_option, Result};
use crate::models::{BreakerRecord, BreakerState};

/// SQLite-backed persistence for the single breaker record.
#[derive(Clone)]
pub struct BreakerRepository {
    db_path: PathBuf,
}

impl BreakerRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS breaker_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                status TEXT NOT NULL DEFAULT 'closed',
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                opened_at TEXT,
                half_open_successes INTEGER NOT NULL DEFAULT 0,
                current_cooldown_secs INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    /// Load the persisted record, or a fresh closed one if none exists yet.
    pub fn load(&self, initial_cooldown_secs: u64) -> Result<BreakerRecord> {
        let conn = self.connect()?;
        let row = to_option(conn.query_row(
            r#"
            SELECT status, consecutive_failures, opened_at,
                   half_open_successes, current_cooldown_secs
            FROM breaker_state WHERE id = 1
            "#,
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)? as u32,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)? as u32,
                    row.get::<_, i64>(4)? as u64,
                ))
            },
        ))?;

        match row {
            Some((status, failures, opened_at, half_open, cooldown)) => Ok(BreakerRecord {
                status: BreakerState::from_str(&status).unwrap_or(BreakerState::Closed),
                consecutive_failures: failures,
                opened_at: parse_datetime_opt(opened_at),
                half_open_successes: half_open,
                current_cooldown_secs: cooldown,
            }),
            None => Ok(BreakerRecord::closed(initial_cooldown_secs)),
        }
    }

    /// Persist the record, replacing whatever was stored before.
    pub fn save(&self, record: &BreakerRecord) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO breaker_state (
                id, status, consecutive_failures, opened_at,
                half_open_successes, current_cooldown_secs, updated_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.status.as_str(),
                record.consecutive_failures,
                record.opened_at.map(|dt| dt.to_rfc3339()),
                record.half_open_successes,
                record.current_cooldown_secs as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
