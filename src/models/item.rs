//! Queue item models for the processing pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing priority. Lower value sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::High),
            1 => Some(Self::Normal),
            2 => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Lifecycle state of a queue item. Exactly one state at any instant; the
/// database row is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Processing,
    Done,
    FailedRetry,
    Dead,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::FailedRetry => "failed_retry",
            Self::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed_retry" => Some(Self::FailedRetry),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A unit of work: one accepted input file moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Database row id.
    pub id: i64,
    /// Where the accepted file lives now.
    pub source_path: PathBuf,
    /// Original inbox path, kept for operator context.
    pub origin_path: Option<PathBuf>,
    /// SHA-256 of the file content, hex encoded.
    pub fingerprint: String,
    pub priority: Priority,
    pub state: ItemState,
    /// Failed attempts so far.
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Stamped on claim; used for stale-item recovery.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest time a failed_retry item becomes claimable again.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Exclusive ownership token for the current attempt.
    pub claim_token: Option<String>,
    /// Worker that holds the current claim.
    pub claimed_by: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields the watcher supplies when enqueueing a freshly accepted file.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub source_path: PathBuf,
    pub origin_path: Option<PathBuf>,
    pub fingerprint: String,
    pub priority: Priority,
}

/// Per-state counts for the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed_retry: u64,
    pub dead: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.done + self.failed_retry + self.dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_roundtrip() {
        for p in [Priority::High, Priority::Normal, Priority::Low] {
            assert_eq!(Priority::from_i32(p.as_i32()), Some(p));
        }
        assert_eq!(Priority::from_i32(7), None);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High.as_i32() < Priority::Normal.as_i32());
        assert!(Priority::Normal.as_i32() < Priority::Low.as_i32());
    }

    #[test]
    fn test_state_roundtrip() {
        for s in [
            ItemState::Pending,
            ItemState::Processing,
            ItemState::Done,
            ItemState::FailedRetry,
            ItemState::Dead,
        ] {
            assert_eq!(ItemState::from_str(s.as_str()), Some(s));
        }
        assert_eq!(ItemState::from_str("unknown"), None);
    }

    #[test]
    fn test_stats_total() {
        let stats = QueueStats {
            pending: 2,
            processing: 1,
            done: 10,
            failed_retry: 1,
            dead: 1,
        };
        assert_eq!(stats.total(), 15);
    }
}
