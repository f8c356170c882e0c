//! Terminal and retry transitions, all conditional on the claim token.

use std::time::Duration;

use chrono::Utc;
use rusqlite::params;
use tracing::{info, warn};

use super::{QueueRepository, Result};

/// Retry scheduling knobs. Backoff doubles per failed attempt, capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(900),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given (1-based) failed attempt may retry.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.max_backoff)
    }
}

impl QueueRepository {
    /// Transition processing → done. Returns false (logged, no-op) when the
    /// claim token does not match, which is how a stale worker completing
    /// after its item was reclaimed is fenced off.
    pub fn mark_done(&self, item_id: i64, claim_token: &str) -> Result<bool> {
        let conn = self.connect()?;
        let updated = conn.execute(
            r#"
            UPDATE queue_items
            SET state = 'done',
                completed_at = ?1,
                claim_token = NULL,
                claimed_by = NULL,
                error_message = NULL
            WHERE id = ?2 AND claim_token = ?3 AND state = 'processing'
            "#,
            params![Utc::now().to_rfc3339(), item_id, claim_token],
        )?;

        if updated == 0 {
            warn!(item_id, "mark_done rejected: stale or mismatched claim");
            return Ok(false);
        }
        Ok(true)
    }

    /// Record a failed attempt. Below the retry budget the item goes to
    /// failed_retry with an increasing backoff; at the budget it goes dead
    /// with the error message recorded for operator inspection.
    ///
    /// Returns false (logged, no-op) on a claim token mismatch.
    pub fn mark_failed(
        &self,
        item_id: i64,
        claim_token: &str,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<bool> {
        let conn = self.connect()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<bool> = (|| {
            let current: Option<(u32, String)> = super::to_option(conn.query_row(
                "SELECT attempt_count, IFNULL(claim_token, '') FROM queue_items \
                 WHERE id = ?1 AND state = 'processing'",
                params![item_id],
                |row| Ok((row.get::<_, i32>(0)? as u32, row.get(1)?)),
            ))?;

            let (attempts, stored_token) = match current {
                Some(v) => v,
                None => {
                    warn!(item_id, "mark_failed rejected: item not processing");
                    return Ok(false);
                }
            };

            if stored_token != claim_token {
                warn!(item_id, "mark_failed rejected: stale or mismatched claim");
                return Ok(false);
            }

            let attempts = attempts + 1;

            if attempts < policy.max_attempts {
                let delay = policy.backoff_for_attempt(attempts);
                let next_retry =
                    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                conn.execute(
                    r#"
                    UPDATE queue_items
                    SET state = 'failed_retry',
                        attempt_count = ?1,
                        next_retry_at = ?2,
                        error_message = ?3,
                        claim_token = NULL,
                        claimed_by = NULL
                    WHERE id = ?4
                    "#,
                    params![attempts, next_retry.to_rfc3339(), error, item_id],
                )?;
                info!(
                    item_id,
                    attempt = attempts,
                    retry_in_secs = delay.as_secs(),
                    "item failed, scheduled for retry"
                );
            } else {
                conn.execute(
                    r#"
                    UPDATE queue_items
                    SET state = 'dead',
                        attempt_count = ?1,
                        error_message = ?2,
                        next_retry_at = NULL,
                        claim_token = NULL,
                        claimed_by = NULL
                    WHERE id = ?3
                    "#,
                    params![attempts, error, item_id],
                )?;
                warn!(item_id, attempts, error, "item exhausted retries, now dead");
            }

            Ok(true)
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }

        result
    }

    /// Startup recovery: items left in processing past the stale threshold
    /// are presumed orphaned by a crashed worker and reset to pending.
    pub fn recover_stale(&self, threshold: Duration) -> Result<usize> {
        let conn = self.connect()?;
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(threshold).unwrap_or_default())
        .to_rfc3339();

        let recovered = conn.execute(
            r#"
            UPDATE queue_items
            SET state = 'pending',
                claim_token = NULL,
                claimed_by = NULL
            WHERE state = 'processing' AND last_attempt_at < ?1
            "#,
            params![cutoff],
        )?;

        if recovered > 0 {
            info!(recovered, "reset stale processing items to pending");
        }
        Ok(recovered)
    }

    /// Reset a dead item to pending with a fresh retry budget.
    pub fn requeue_dead(&self, item_id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let updated = conn.execute(
            r#"
            UPDATE queue_items
            SET state = 'pending',
                attempt_count = 0,
                next_retry_at = NULL,
                error_message = NULL
            WHERE id = ?1 AND state = 'dead'
            "#,
            params![item_id],
        )?;
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
        };
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(60));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(120));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(240));
        // Capped from here on
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_secs(300));
        assert_eq!(policy.backoff_for_attempt(12), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_monotonic() {
        let policy = RetryPolicy::default();
        let mut last = Duration::ZERO;
        for attempt in 1..10 {
            let d = policy.backoff_for_attempt(attempt);
            assert!(d >= last);
            last = d;
        }
    }
}
