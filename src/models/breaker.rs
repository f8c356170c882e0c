//! Circuit breaker state models.
//!
//! The breaker record is persisted next to the queue so a restart does not
//! silently reset an open circuit and re-hammer a known-down service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breaker state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls fail fast without touching the service.
    Open,
    /// A few trial calls are allowed through to probe recovery.
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "closed" => Some(Self::Closed),
            "open" => Some(Self::Open),
            "half_open" => Some(Self::HalfOpen),
            _ => None,
        }
    }
}

/// Durable breaker record, one row in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerRecord {
    pub status: BreakerState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_successes: u32,
    /// Current cooldown in seconds; doubles on each re-open, capped.
    pub current_cooldown_secs: u64,
}

impl BreakerRecord {
    pub fn closed(initial_cooldown_secs: u64) -> Self {
        Self {
            status: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_successes: 0,
            current_cooldown_secs: initial_cooldown_secs,
        }
    }

    /// Seconds of cooldown left, zero when not open.
    pub fn cooldown_remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        match (self.status, self.opened_at) {
            (BreakerState::Open, Some(opened)) => {
                let elapsed = (now - opened).num_seconds().max(0) as u64;
                self.current_cooldown_secs.saturating_sub(elapsed)
            }
            _ => 0,
        }
    }
}

/// Aggregate view for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub status: BreakerState,
    pub consecutive_failures: u32,
    pub cooldown_remaining_secs: u64,
}
