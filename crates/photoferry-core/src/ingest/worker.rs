//! Transfer workers
//!
//! Workers share one receiver; each dequeued file runs in its own task so a
//! panic costs that file, not the worker. A supervisor restarts workers that
//! die anyway.

use super::coordinator::PipelineContext;
use super::inflight::RecordOutcome;
use super::record::IngestionStatus;
use super::IngestError;
use crate::retry::{self, RetryError};
use crate::transfer::{ChainExhausted, TransferReport};
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// A validated file waiting for upload
#[derive(Debug, Clone)]
pub(super) struct WorkItem {
    pub path: PathBuf,
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Spawn the worker pool and its supervisor
///
/// The returned task ends once every worker has stopped: when the queue is
/// closed and empty, or at shutdown when draining is disabled.
pub(super) fn spawn_pool(ctx: Arc<PipelineContext>, rx: mpsc::Receiver<WorkItem>) -> JoinHandle<()> {
    let rx: SharedReceiver = Arc::new(Mutex::new(rx));
    tokio::spawn(supervise(ctx, rx))
}

async fn supervise(ctx: Arc<PipelineContext>, rx: SharedReceiver) {
    let mut workers = JoinSet::new();
    let mut next_id = 0;
    for _ in 0..ctx.config.workers.count {
        workers.spawn(worker_loop(next_id, Arc::clone(&ctx), Arc::clone(&rx)));
        next_id += 1;
    }
    info!(workers = next_id, "Transfer workers started");

    while let Some(result) = workers.join_next().await {
        match result {
            Ok(id) => debug!(worker = id, "Worker stopped"),
            Err(e) if e.is_panic() => {
                error!(error = %e, worker = next_id, "Worker crashed, restarting");
                workers.spawn(worker_loop(next_id, Arc::clone(&ctx), Arc::clone(&rx)));
                next_id += 1;
            },
            Err(e) => warn!(error = %e, "Worker cancelled"),
        }
    }

    // Files still queued stay in the source directory for the next run
    let mut rx = rx.lock().await;
    rx.close();
    let mut left = 0;
    while let Ok(item) = rx.try_recv() {
        ctx.registry.release(&item.path);
        left += 1;
    }
    if left > 0 {
        info!(left, "Left queued files in the source directory");
    }
    info!("Transfer workers stopped");
}

async fn worker_loop(id: usize, ctx: Arc<PipelineContext>, rx: SharedReceiver) -> usize {
    loop {
        let item = {
            let mut rx = rx.lock().await;
            if ctx.config.workers.drain_on_shutdown {
                rx.recv().await
            } else {
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => None,
                    item = rx.recv() => item,
                }
            }
        };

        let Some(item) = item else {
            break;
        };
        debug!(worker = id, path = %item.path.display(), "Dequeued file");
        run_item(&ctx, item).await;
    }
    id
}

async fn run_item(ctx: &Arc<PipelineContext>, item: WorkItem) {
    let task = tokio::spawn(process(Arc::clone(ctx), item.path.clone()));
    if let Err(e) = task.await {
        let reason = if e.is_panic() {
            panic_message(e.into_panic())
        } else {
            "transfer task cancelled".to_string()
        };
        error!(path = %item.path.display(), reason = %reason, "Transfer task crashed");

        let attempts = ctx.registry.get(&item.path).map(|r| r.attempts).unwrap_or(0);
        ctx.complete(
            &item.path,
            RecordOutcome::Failed {
                error: IngestError::Fatal { attempts, reason },
            },
        );
    }
}

#[tracing::instrument(skip_all, fields(path = %path.display()))]
async fn process(ctx: Arc<PipelineContext>, path: PathBuf) {
    if let Err(e) = ctx.registry.advance(&path, IngestionStatus::Transferring) {
        warn!(error = %e, "Skipping work item");
        return;
    }

    let result = retry::run_classified(&ctx.transfer_policy, |_| {
        let ctx = Arc::clone(&ctx);
        let path = path.clone();
        async move { transfer_once(&ctx, path).await }
    })
    .await;

    let outcome = match result {
        Ok(report) => RecordOutcome::Transferred {
            protocol: report.delivery.protocol,
            transfer_attempts: report.attempts.len(),
        },
        Err(RetryError::Exhausted { attempts, error }) => RecordOutcome::Failed {
            error: IngestError::ExhaustedRetries {
                attempts,
                last: error.last_error,
            },
        },
        Err(RetryError::Fatal { attempts, error }) => RecordOutcome::Failed {
            error: IngestError::Fatal {
                attempts,
                reason: error.last_error.to_string(),
            },
        },
    };
    ctx.complete(&path, outcome);
}

/// One run of the fallback chain, counted on the record
async fn transfer_once(ctx: &PipelineContext, path: PathBuf) -> Result<TransferReport, ChainExhausted> {
    let run = ctx.registry.note_attempt(&path);
    debug!(run, "Running transfer chain");

    let result = ctx.engine.transfer(&path).await;
    if let Err(exhausted) = &result {
        ctx.registry.add_transfer_attempts(&path, exhausted.attempts.len());
        for summary in exhausted.by_protocol() {
            debug!(
                protocol = %summary.protocol,
                strategies = summary.strategies_tried,
                last_error = summary.last_error.as_deref().unwrap_or("-"),
                "Protocol failed"
            );
        }
    }
    result
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(_) => "worker panicked".to_string(),
    }
}
