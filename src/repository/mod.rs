//! Repository layer for the durable pipeline store.
//!
//! One SQLite file holds the work queue and the circuit breaker record.
//! Every state transition goes through these repositories; nothing else in
//! the crate is allowed to read-modify-write item fields.

pub mod breaker;
pub mod queue;

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub use breaker::BreakerRepository;
pub use queue::{QueueRepository, RetryPolicy};

/// Errors from the repository layer.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("duplicate item for {0}")]
    DuplicateItem(String),

    #[error("item {0} not found")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Open a connection with the concurrency settings every caller needs.
/// WAL plus a generous busy timeout lets multiple workers and the watcher
/// share the file without stepping on each other.
pub(crate) fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
    "#,
    )?;
    Ok(conn)
}

/// Collapse a no-rows query into `None`.
pub(crate) fn to_option<T>(
    result: std::result::Result<T, rusqlite::Error>,
) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
