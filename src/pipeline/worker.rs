//! Single worker loop: claim, extract, analyze through the breaker, store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analysis::{AnalysisError, AnalysisInput, AnalysisResult};
use crate::models::{ItemState, QueueItem};

use super::{next_idle_backoff, PipelineConfig, PipelineContext, PipelineEvent};

/// How one item attempt ended, before the queue transition is applied.
enum Outcome {
    Completed,
    Degraded { from_cache: bool },
    Failed(String),
}

pub(super) struct Worker {
    pub index: usize,
    pub config: PipelineConfig,
    pub ctx: Arc<PipelineContext>,
    pub target_rx: watch::Receiver<usize>,
    pub event_tx: mpsc::Sender<PipelineEvent>,
    pub cancellation_token: CancellationToken,
}

impl Worker {
    pub async fn run(mut self) {
        let worker_id = format!("worker-{}", self.index);
        let mut idle_backoff = Duration::from_millis(self.config.idle_backoff_ms);

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            // Workers above the advised target park until it rises again.
            if self.index >= *self.target_rx.borrow() {
                tokio::select! {
                    _ = self.cancellation_token.cancelled() => break,
                    changed = self.target_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            match self.ctx.queue.claim_next(&worker_id) {
                Ok(Some(item)) => {
                    idle_backoff = Duration::from_millis(self.config.idle_backoff_ms);
                    self.process(&worker_id, item).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = self.cancellation_token.cancelled() => break,
                        _ = tokio::time::sleep(idle_backoff) => {}
                    }
                    idle_backoff = next_idle_backoff(&self.config, idle_backoff);
                }
                Err(e) => {
                    error!(worker = %worker_id, "claim failed: {}", e);
                    tokio::select! {
                        _ = self.cancellation_token.cancelled() => break,
                        _ = tokio::time::sleep(idle_backoff) => {}
                    }
                    idle_backoff = next_idle_backoff(&self.config, idle_backoff);
                }
            }
        }

        debug!(worker = %worker_id, "worker exiting");
    }

    /// Run one claimed item to a terminal transition. The item stays claimed
    /// for the whole attempt; shutdown waits for this to finish.
    async fn process(&self, worker_id: &str, item: QueueItem) {
        let claim_token = match item.claim_token.clone() {
            Some(token) => token,
            None => {
                // claim_next always sets a token; treat this as a bug signal.
                warn!(item_id = item.id, "claimed item missing token, skipping");
                return;
            }
        };

        let _ = self
            .event_tx
            .send(PipelineEvent::Claimed {
                item_id: item.id,
                worker: worker_id.to_string(),
                path: item.source_path.clone(),
            })
            .await;

        let deadline = Duration::from_secs(self.config.item_timeout_secs);
        let outcome = match tokio::time::timeout(deadline, self.attempt(&item)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Failed(format!(
                "processing exceeded {}s deadline",
                deadline.as_secs()
            )),
        };

        match outcome {
            Outcome::Completed => {
                if self.finish(&item, &claim_token) {
                    info!(item_id = item.id, worker = %worker_id, "item completed");
                    let _ = self
                        .event_tx
                        .send(PipelineEvent::Completed { item_id: item.id })
                        .await;
                }
            }
            Outcome::Degraded { from_cache } => {
                if self.finish(&item, &claim_token) {
                    info!(item_id = item.id, from_cache, "item completed degraded");
                    let _ = self
                        .event_tx
                        .send(PipelineEvent::Degraded {
                            item_id: item.id,
                            from_cache,
                        })
                        .await;
                }
            }
            Outcome::Failed(error) => self.fail(&item, &claim_token, error).await,
        }
    }

    /// Extract, analyze through the breaker, store. An open circuit is not a
    /// failed attempt: the item completes on the fallback path instead of
    /// burning retry budget on an outage it cannot influence.
    async fn attempt(&self, item: &QueueItem) -> Outcome {
        let extractor = self.ctx.extractor.clone();
        let path = item.source_path.clone();
        let extracted = match tokio::task::spawn_blocking(move || extractor.extract(&path)).await {
            Ok(Ok(doc)) => doc,
            Ok(Err(e)) => return Outcome::Failed(format!("extract: {}", e)),
            Err(e) => return Outcome::Failed(format!("extract task: {}", e)),
        };

        let input = AnalysisInput {
            fingerprint: item.fingerprint.clone(),
            title: extracted.title.clone(),
            text: extracted.text,
            metadata: serde_json::json!({
                "source_path": item.source_path,
                "priority": item.priority.as_str(),
                "byte_len": extracted.byte_len,
            }),
        };

        let analyzer = self.ctx.analyzer.clone();
        let analysis = self
            .ctx
            .breaker
            .call(|| async move { analyzer.analyze(&input).await })
            .await;

        match analysis {
            Ok(result) => match self.store(item, &result).await {
                Ok(()) => Outcome::Completed,
                Err(e) => Outcome::Failed(format!("store: {}", e)),
            },
            Err(AnalysisError::Unavailable) => self.fallback(item, &extracted.title).await,
            Err(e) => Outcome::Failed(format!("analyze: {}", e)),
        }
    }

    /// Fallback when the circuit is open: reuse the freshest real result for
    /// the same content, else store a placeholder the operator can act on.
    async fn fallback(&self, item: &QueueItem, title: &str) -> Outcome {
        let cached = match self.ctx.sink.get_cached_result(&item.fingerprint).await {
            Ok(cached) => cached,
            Err(e) => return Outcome::Failed(format!("fallback cache lookup: {}", e)),
        };

        let (mut result, from_cache) = match cached {
            Some(result) => (result, true),
            None => (AnalysisResult::placeholder(title), false),
        };
        result.degraded = true;

        match self.store(item, &result).await {
            Ok(()) => Outcome::Degraded { from_cache },
            Err(e) => Outcome::Failed(format!("store fallback: {}", e)),
        }
    }

    async fn store(&self, item: &QueueItem, result: &AnalysisResult) -> anyhow::Result<()> {
        self.ctx
            .sink
            .store_result(item.id, &item.fingerprint, result)
            .await
    }

    /// Apply mark_done; a false return means the claim was fenced off and
    /// another worker owns the item now.
    fn finish(&self, item: &QueueItem, claim_token: &str) -> bool {
        match self.ctx.queue.mark_done(item.id, claim_token) {
            Ok(applied) => applied,
            Err(e) => {
                error!(item_id = item.id, "mark_done failed: {}", e);
                false
            }
        }
    }

    async fn fail(&self, item: &QueueItem, claim_token: &str, error: String) {
        warn!(item_id = item.id, "attempt failed: {}", error);

        match self
            .ctx
            .queue
            .mark_failed(item.id, claim_token, &error, &self.ctx.retry_policy)
        {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!(item_id = item.id, "mark_failed failed: {}", e);
                return;
            }
        }

        // Report where the item landed.
        match self.ctx.queue.get_item(item.id) {
            Ok(Some(updated)) if updated.state == ItemState::Dead => {
                let _ = self
                    .event_tx
                    .send(PipelineEvent::Dead {
                        item_id: item.id,
                        error,
                    })
                    .await;
            }
            Ok(Some(updated)) => {
                let _ = self
                    .event_tx
                    .send(PipelineEvent::Failed {
                        item_id: item.id,
                        attempt: updated.attempt_count,
                        error,
                    })
                    .await;
            }
            Ok(None) => {}
            Err(e) => error!(item_id = item.id, "post-failure read failed: {}", e),
        }
    }
}
