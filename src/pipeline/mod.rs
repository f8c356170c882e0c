//! Worker pool driving claimed items through extract, analyze, and store.
//!
//! Workers are long-lived tasks that race on `QueueRepository::claim_next`;
//! claim exclusivity lives in the database, so the pool itself holds no
//! shared work state. Progress is emitted as events for the status surface.

mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::analysis::AnalysisService;
use crate::breaker::CircuitBreaker;
use crate::extract::DocumentExtractor;
use crate::repository::{QueueRepository, RetryPolicy};
use crate::sink::ResultSink;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_workers: usize,
    /// Hard ceiling on one item's extract-analyze-store cycle.
    pub item_timeout_secs: u64,
    pub idle_backoff_ms: u64,
    pub idle_backoff_max_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            item_timeout_secs: 180,
            idle_backoff_ms: 500,
            idle_backoff_max_ms: 10_000,
        }
    }
}

/// Events emitted while items move through the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A worker claimed an item.
    Claimed {
        item_id: i64,
        worker: String,
        path: PathBuf,
    },
    /// Item finished with a real analysis result.
    Completed { item_id: i64 },
    /// Item finished on the fallback path while the service was unavailable.
    Degraded { item_id: i64, from_cache: bool },
    /// Attempt failed; the item is scheduled for retry.
    Failed {
        item_id: i64,
        attempt: u32,
        error: String,
    },
    /// Item exhausted its retry budget.
    Dead { item_id: i64, error: String },
}

/// Everything a worker needs, shared across the pool.
pub struct PipelineContext {
    pub queue: QueueRepository,
    pub breaker: Arc<CircuitBreaker>,
    pub analyzer: Arc<dyn AnalysisService>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub sink: Arc<dyn ResultSink>,
    pub retry_policy: RetryPolicy,
}

/// Fixed set of worker tasks; the resource monitor's watch channel tells
/// workers above the current target to park between items.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        config: PipelineConfig,
        ctx: Arc<PipelineContext>,
        target_rx: watch::Receiver<usize>,
        event_tx: mpsc::Sender<PipelineEvent>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let mut handles = Vec::with_capacity(config.max_workers);

        for index in 0..config.max_workers {
            let worker = worker::Worker {
                index,
                config: config.clone(),
                ctx: ctx.clone(),
                target_rx: target_rx.clone(),
                event_tx: event_tx.clone(),
                cancellation_token: cancellation_token.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        info!(workers = config.max_workers, "worker pool started");
        Self { handles }
    }

    /// Wait for all workers to finish their current item and exit. Callers
    /// cancel the shared token first.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Next sleep after an empty claim. Doubles up to the cap.
fn next_idle_backoff(config: &PipelineConfig, current: Duration) -> Duration {
    let doubled = current
        .saturating_mul(2)
        .min(Duration::from_millis(config.idle_backoff_max_ms));
    doubled.max(Duration::from_millis(config.idle_backoff_ms))
}
