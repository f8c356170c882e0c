//! The long-running pipeline: watcher, workers, monitor, breaker.

use std::sync::Arc;

use console::style;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::analysis::{AnalysisService, HttpAnalysisClient};
use crate::breaker::CircuitBreaker;
use crate::config::Settings;
use crate::extract::{DocumentExtractor, TextExtractor};
use crate::monitor::ResourceMonitor;
use crate::pipeline::{PipelineContext, PipelineEvent, WorkerPool};
use crate::repository::{BreakerRepository, QueueRepository};
use crate::sink::{ResultSink, SqliteResultSink};
use crate::watcher::Watcher;

pub async fn cmd_run(settings: Settings, workers_override: Option<usize>) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.data_dir.0)?;
    let db_path = settings.db_path();

    let queue = QueueRepository::new(&db_path)?;

    // Startup recovery before any worker can claim.
    let recovered = queue.recover_stale(settings.queue.stale_threshold())?;
    if recovered > 0 {
        println!(
            "{} recovered {} stale processing items",
            style("!").yellow(),
            recovered
        );
    }
    let purged = queue.cleanup_done(settings.queue.cleanup_done_after_days)?;
    if purged > 0 {
        info!(purged, "cleaned up old done items");
    }

    let breaker_repo = BreakerRepository::new(&db_path)?;
    let breaker = Arc::new(CircuitBreaker::new(breaker_repo, settings.breaker.clone())?);

    let analyzer: Arc<dyn AnalysisService> =
        Arc::new(HttpAnalysisClient::new(settings.analysis.clone())?);
    let extractor: Arc<dyn DocumentExtractor> = Arc::new(TextExtractor);
    let sink: Arc<dyn ResultSink> = Arc::new(SqliteResultSink::new(&db_path)?);

    let mut pipeline_config = settings.pipeline.clone();
    if let Some(workers) = workers_override {
        pipeline_config.max_workers = workers.max(1);
    }

    let cancellation_token = CancellationToken::new();

    let watcher = Watcher::new(settings.watcher.clone(), queue.clone())?;
    let swept = watcher.sweep_accepted()?;
    if swept > 0 {
        println!(
            "{} re-enqueued {} accepted files without queue entries",
            style("!").yellow(),
            swept
        );
    }
    let watcher_handle = tokio::spawn(watcher.run(cancellation_token.clone()));

    let monitor = ResourceMonitor::start(
        settings.monitor.clone(),
        pipeline_config.max_workers,
        cancellation_token.clone(),
    );

    let (event_tx, event_rx) = mpsc::channel(64);
    let ctx = Arc::new(PipelineContext {
        queue,
        breaker,
        analyzer,
        extractor,
        sink,
        retry_policy: settings.queue.retry_policy(),
    });
    let pool = WorkerPool::start(
        pipeline_config.clone(),
        ctx,
        monitor.subscribe(),
        event_tx,
        cancellation_token.clone(),
    );
    let events_handle = tokio::spawn(print_events(event_rx));

    println!(
        "{} watching {} with up to {} workers (ctrl-c to stop)",
        style("✓").green(),
        settings.watcher.inbox_dir.display(),
        monitor.current_target()
    );

    tokio::signal::ctrl_c().await?;
    println!(
        "\n{} shutting down, waiting for in-flight items",
        style("!").yellow()
    );
    cancellation_token.cancel();

    pool.join().await;
    let _ = watcher_handle.await;
    let _ = events_handle.await;

    println!("{} stopped", style("✓").green());
    Ok(())
}

/// Console progress lines, one per pipeline event.
async fn print_events(mut rx: mpsc::Receiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Claimed {
                item_id,
                worker,
                path,
            } => {
                println!(
                    "  {} [{}] #{} {}",
                    style("→").cyan(),
                    worker,
                    item_id,
                    path.display()
                );
            }
            PipelineEvent::Completed { item_id } => {
                println!("  {} #{} analyzed", style("✓").green(), item_id);
            }
            PipelineEvent::Degraded { item_id, from_cache } => {
                let source = if from_cache { "cached result" } else { "placeholder" };
                println!(
                    "  {} #{} completed degraded ({})",
                    style("~").yellow(),
                    item_id,
                    source
                );
            }
            PipelineEvent::Failed {
                item_id,
                attempt,
                error,
            } => {
                println!(
                    "  {} #{} attempt {} failed: {}",
                    style("✗").red(),
                    item_id,
                    attempt,
                    error
                );
            }
            PipelineEvent::Dead { item_id, error } => {
                println!(
                    "  {} #{} dead after exhausting retries: {}",
                    style("✗").red().bold(),
                    item_id,
                    error
                );
            }
        }
    }
}
