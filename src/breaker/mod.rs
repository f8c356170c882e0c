//! Circuit breaker around the external analysis service.
//!
//! Stops every worker from hammering a failing dependency at full rate:
//! after enough consecutive failures the circuit opens and calls fail fast
//! until a cooldown elapses, then a few trial calls probe recovery. Each
//! transition is persisted so a restart keeps an open circuit open.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::AnalysisError;
use crate::models::{BreakerRecord, BreakerState, BreakerStatus};
use crate::repository::BreakerRepository;

/// Breaker tuning. All values are configuration defaults, not hard
/// requirements; only monotonic capped growth of the cooldown matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Successes in half-open needed to close again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// First cooldown after opening, in seconds.
    #[serde(default = "default_initial_cooldown_secs")]
    pub initial_cooldown_secs: u64,
    /// Cooldown growth cap, in seconds.
    #[serde(default = "default_max_cooldown_secs")]
    pub max_cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    2
}

fn default_initial_cooldown_secs() -> u64 {
    30
}

fn default_max_cooldown_secs() -> u64 {
    600
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            initial_cooldown_secs: default_initial_cooldown_secs(),
            max_cooldown_secs: default_max_cooldown_secs(),
        }
    }
}

/// Three-state circuit breaker with durable state.
///
/// The lock is only held for bookkeeping, never across the guarded call.
pub struct CircuitBreaker {
    config: BreakerConfig,
    record: Mutex<BreakerRecord>,
    repo: BreakerRepository,
}

impl CircuitBreaker {
    /// Build from the persisted record so a restart resumes where the
    /// previous process left off.
    pub fn new(repo: BreakerRepository, config: BreakerConfig) -> crate::repository::Result<Self> {
        let record = repo.load(config.initial_cooldown_secs)?;
        if record.status == BreakerState::Open {
            info!(
                cooldown_secs = record.current_cooldown_secs,
                "circuit breaker restored in open state"
            );
        }
        Ok(Self {
            config,
            record: Mutex::new(record),
            repo,
        })
    }

    /// Run the guarded operation through the breaker.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, AnalysisError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AnalysisError>>,
    {
        self.admit()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Gate a call: closed and half-open pass, open fails fast unless the
    /// cooldown has elapsed, which flips the circuit to half-open.
    fn admit(&self) -> Result<(), AnalysisError> {
        let mut record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        match record.status {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                if record.cooldown_remaining_secs(Utc::now()) == 0 {
                    record.status = BreakerState::HalfOpen;
                    record.half_open_successes = 0;
                    info!("circuit breaker cooldown elapsed, half-open");
                    self.persist(&record);
                    Ok(())
                } else {
                    Err(AnalysisError::Unavailable)
                }
            }
        }
    }

    fn record_success(&self) {
        let mut record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        match record.status {
            BreakerState::Closed => {
                if record.consecutive_failures > 0 {
                    record.consecutive_failures = 0;
                    self.persist(&record);
                }
            }
            BreakerState::HalfOpen => {
                record.half_open_successes += 1;
                if record.half_open_successes >= self.config.success_threshold {
                    record.status = BreakerState::Closed;
                    record.consecutive_failures = 0;
                    record.half_open_successes = 0;
                    record.opened_at = None;
                    record.current_cooldown_secs = self.config.initial_cooldown_secs;
                    info!("circuit breaker closed after successful trials");
                }
                self.persist(&record);
            }
            BreakerState::Open => {}
        }
    }

    fn record_failure(&self, err: &AnalysisError) {
        // Fail-fast rejections never count as service failures.
        if matches!(err, AnalysisError::Unavailable) {
            return;
        }

        let mut record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        match record.status {
            BreakerState::Closed => {
                record.consecutive_failures += 1;
                if record.consecutive_failures >= self.config.failure_threshold {
                    record.status = BreakerState::Open;
                    record.opened_at = Some(Utc::now());
                    warn!(
                        failures = record.consecutive_failures,
                        cooldown_secs = record.current_cooldown_secs,
                        "circuit breaker opened"
                    );
                }
                self.persist(&record);
            }
            BreakerState::HalfOpen => {
                // A single failed trial reopens with a longer cooldown.
                record.status = BreakerState::Open;
                record.opened_at = Some(Utc::now());
                record.half_open_successes = 0;
                record.consecutive_failures += 1;
                record.current_cooldown_secs = (record.current_cooldown_secs * 2)
                    .min(self.config.max_cooldown_secs);
                warn!(
                    cooldown_secs = record.current_cooldown_secs,
                    "circuit breaker reopened from half-open"
                );
                self.persist(&record);
            }
            BreakerState::Open => {}
        }
    }

    /// Aggregate view for the status surface.
    pub fn status(&self) -> BreakerStatus {
        let record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        BreakerStatus {
            status: record.status,
            consecutive_failures: record.consecutive_failures,
            cooldown_remaining_secs: record.cooldown_remaining_secs(Utc::now()),
        }
    }

    /// Current cooldown length. Exposed for tests asserting monotone growth.
    pub fn current_cooldown(&self) -> Duration {
        let record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        Duration::from_secs(record.current_cooldown_secs)
    }

    fn persist(&self, record: &BreakerRecord) {
        if let Err(e) = self.repo.save(record) {
            warn!("failed to persist breaker state: {e}");
        }
    }

    #[cfg(test)]
    pub(crate) fn force_open_in_past(&self, secs_ago: i64) {
        let mut record = self.record.lock().unwrap();
        record.status = BreakerState::Open;
        record.opened_at = Some(Utc::now() - chrono::Duration::seconds(secs_ago));
        self.persist(&record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(dir: &tempfile::TempDir) -> CircuitBreaker {
        let repo = BreakerRepository::new(&dir.path().join("pipeline.db")).unwrap();
        CircuitBreaker::new(repo, BreakerConfig::default()).unwrap()
    }

    async fn failing_call(breaker: &CircuitBreaker) -> Result<(), AnalysisError> {
        breaker
            .call(|| async { Err::<(), _>(AnalysisError::Service("boom".into())) })
            .await
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let b = breaker(&dir);

        for _ in 0..3 {
            let _ = failing_call(&b).await;
        }
        assert_eq!(b.status().status, BreakerState::Open);

        // Open circuit fails fast without invoking the operation
        let calls = AtomicUsize::new(0);
        let result = b
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AnalysisError>(())
            })
            .await;
        assert!(matches!(result, Err(AnalysisError::Unavailable)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let b = breaker(&dir);

        for _ in 0..3 {
            let _ = failing_call(&b).await;
        }
        b.force_open_in_past(60);

        // First call after cooldown goes through as a trial
        let r = b.call(|| async { Ok::<_, AnalysisError>(1) }).await;
        assert!(r.is_ok());
        assert_eq!(b.status().status, BreakerState::HalfOpen);

        // Second success closes and resets failures
        let r = b.call(|| async { Ok::<_, AnalysisError>(2) }).await;
        assert!(r.is_ok());
        let status = b.status();
        assert_eq!(status.status, BreakerState::Closed);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(b.current_cooldown(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_half_open_failure_grows_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let b = breaker(&dir);

        for _ in 0..3 {
            let _ = failing_call(&b).await;
        }
        let before = b.current_cooldown();
        b.force_open_in_past(60);

        let _ = failing_call(&b).await;
        assert_eq!(b.status().status, BreakerState::Open);
        assert!(b.current_cooldown() > before);
        assert!(b.current_cooldown() <= Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_open_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("pipeline.db");
        {
            let repo = BreakerRepository::new(&db).unwrap();
            let b = CircuitBreaker::new(repo, BreakerConfig::default()).unwrap();
            for _ in 0..3 {
                let _ = failing_call(&b).await;
            }
            assert_eq!(b.status().status, BreakerState::Open);
        }

        let repo = BreakerRepository::new(&db).unwrap();
        let restarted = CircuitBreaker::new(repo, BreakerConfig::default()).unwrap();
        assert_eq!(restarted.status().status, BreakerState::Open);
        let result = restarted
            .call(|| async { Ok::<_, AnalysisError>(()) })
            .await;
        assert!(matches!(result, Err(AnalysisError::Unavailable)));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let dir = tempfile::tempdir().unwrap();
        let b = breaker(&dir);

        let _ = failing_call(&b).await;
        let _ = failing_call(&b).await;
        let _ = b.call(|| async { Ok::<_, AnalysisError>(()) }).await;
        assert_eq!(b.status().consecutive_failures, 0);

        // The streak starts over, so two more failures stay closed
        let _ = failing_call(&b).await;
        let _ = failing_call(&b).await;
        assert_eq!(b.status().status, BreakerState::Closed);
    }
}
