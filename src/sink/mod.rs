//! Result sink boundary.
//!
//! Long-term result storage is a collaborator; the pipeline only stores
//! finished analyses through this seam and reads cached ones back for the
//! circuit-breaker fallback path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;

use crate::analysis::AnalysisResult;
use crate::repository::{self, Result};

/// Destination for finished analyses, plus the fallback cache lookup.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store_result(
        &self,
        item_id: i64,
        fingerprint: &str,
        result: &AnalysisResult,
    ) -> anyhow::Result<()>;

    /// Most recent non-degraded result for the same content, if any.
    async fn get_cached_result(&self, fingerprint: &str) -> anyhow::Result<Option<AnalysisResult>>;
}

/// SQLite-backed sink sharing the pipeline database file.
pub struct SqliteResultSink {
    db_path: PathBuf,
}

impl SqliteResultSink {
    pub fn new(db_path: &Path) -> Result<Self> {
        let sink = Self {
            db_path: db_path.to_path_buf(),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = repository::connect(&self.db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL,
                fingerprint TEXT NOT NULL,
                payload TEXT NOT NULL,
                degraded INTEGER NOT NULL DEFAULT 0,
                stored_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_results_fingerprint
                ON results(fingerprint, stored_at);
        "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for SqliteResultSink {
    async fn store_result(
        &self,
        item_id: i64,
        fingerprint: &str,
        result: &AnalysisResult,
    ) -> anyhow::Result<()> {
        let conn = repository::connect(&self.db_path)?;
        conn.execute(
            r#"
            INSERT INTO results (item_id, fingerprint, payload, degraded, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                item_id,
                fingerprint,
                serde_json::to_string(result)?,
                result.degraded as i32,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_cached_result(
        &self,
        fingerprint: &str,
    ) -> anyhow::Result<Option<AnalysisResult>> {
        let conn = repository::connect(&self.db_path)?;
        let payload = repository::to_option(conn.query_row(
            r#"
            SELECT payload FROM results
            WHERE fingerprint = ?1 AND degraded = 0
            ORDER BY stored_at DESC
            LIMIT 1
            "#,
            params![fingerprint],
            |row| row.get::<_, String>(0),
        ))?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
