//! The ingestion coordinator
//!
//! One dispatcher task turns notifications into candidate tasks. Each
//! candidate task owns its path in the [`InflightRegistry`] from the first
//! size sample until the file is queued, quarantined or released; a worker
//! owns it from dequeue to the terminal state.

use super::inflight::{Claim, InflightRegistry, RecordOutcome, RunSummary};
use super::observer::{IngestionObserver, LoggingObserver, SourceDisposition};
use super::quarantine::quarantine_file;
use super::record::{IngestionRecord, IngestionStatus};
use super::watcher::{normalize, scan_directory, CandidateFilter, SourceWatcher, WatchMode};
use super::worker::{spawn_pool, WorkItem};
use super::IngestError;
use crate::config::{PipelineConfig, QuarantinePolicy, UnknownPolicy};
use crate::inspect::{IntegrityInspector, IntegrityVerdict, SourceFile};
use crate::retry::{self, Backoff, RetryPolicy};
use crate::transfer::TransferEngine;
use photoferry_common::{FerryError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// State shared by the dispatcher, candidate tasks and workers
pub(super) struct PipelineContext {
    pub config: PipelineConfig,
    pub engine: TransferEngine,
    pub inspector: IntegrityInspector,
    pub registry: InflightRegistry,
    pub observer: Arc<dyn IngestionObserver>,
    pub transfer_policy: RetryPolicy,
    pub cancel: CancellationToken,
    notify_tx: mpsc::UnboundedSender<PathBuf>,
}

impl PipelineContext {
    /// Finish a record and fire its callback, once
    pub fn complete(&self, path: &Path, outcome: RecordOutcome) {
        let Some(record) = self.registry.finish(path, outcome) else {
            debug!(path = %path.display(), "Record already finished");
            return;
        };

        match record.status {
            IngestionStatus::Transferred => {
                if self.observer.on_transferred(&record) == SourceDisposition::Purged
                    && self.registry.mark_purged(record.id)
                {
                    debug!(path = %record.path.display(), "Source file purged");
                }
            },
            IngestionStatus::Quarantined => {
                let verdict = record.verdict.unwrap_or(IntegrityVerdict::Unknown);
                self.observer.on_quarantined(&record, verdict);
            },
            IngestionStatus::Failed => {
                if let Some(error) = &record.error {
                    self.observer.on_exhausted(&record, error);
                }
            },
            _ => {},
        }
    }

    /// Drop the claim; a notification that raced the check is replayed
    fn release(&self, path: &Path) {
        if self.registry.release(path) && !self.cancel.is_cancelled() {
            debug!(path = %path.display(), "Re-checking after newer notification");
            let _ = self.notify_tx.send(path.to_path_buf());
        }
    }
}

/// Builds and starts the pipeline
///
/// # Example
///
/// ```rust,ignore
/// let handle = IngestionCoordinator::new(config, engine)
///     .with_observer(Arc::new(DeleteSource))
///     .start()?;
/// ```
pub struct IngestionCoordinator {
    config: PipelineConfig,
    engine: TransferEngine,
    observer: Arc<dyn IngestionObserver>,
    registry: InflightRegistry,
}

impl IngestionCoordinator {
    pub fn new(config: PipelineConfig, engine: TransferEngine) -> Self {
        let registry = InflightRegistry::new(config.workers.report_history);
        Self {
            config,
            engine,
            observer: Arc::new(LoggingObserver),
            registry,
        }
    }

    /// Replace the default logging observer
    pub fn with_observer(mut self, observer: Arc<dyn IngestionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn registry(&self) -> InflightRegistry {
        self.registry.clone()
    }

    /// Scan the source directory, then keep watching it until shutdown
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<IngestionHandle> {
        self.launch(true)
    }

    /// Process the files present right now, drain the queue and stop
    pub async fn scan_once(self) -> Result<RunSummary> {
        let handle = self.launch(false)?;
        Ok(handle.join().await)
    }

    fn launch(self, watch: bool) -> Result<IngestionHandle> {
        let source = &self.config.source.directory;
        let root = std::fs::canonicalize(source).map_err(|e| {
            FerryError::config(format!("source directory {} is not accessible: {e}", source.display()))
        })?;
        if !root.is_dir() {
            return Err(FerryError::config(format!("{} is not a directory", root.display())));
        }

        let mut filter = CandidateFilter::new(self.config.source.include_hidden);
        if self.config.integrity.quarantine_policy == QuarantinePolicy::Move {
            filter = filter.exclude(&self.config.integrity.quarantine_dir);
        }
        if self.config.local_backup.enabled {
            filter = filter.exclude(&self.config.local_backup.directory);
        }

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let watcher = if watch {
            Some(SourceWatcher::start(&self.config.source, &root, filter.clone(), notify_tx.clone())?)
        } else {
            None
        };

        let (queue_tx, queue_rx) = mpsc::channel(self.config.workers.queue_capacity);
        let ctx = Arc::new(PipelineContext {
            inspector: IntegrityInspector::new(&self.config.integrity),
            transfer_policy: RetryPolicy::from_config(&self.config.retry),
            config: self.config,
            engine: self.engine,
            registry: self.registry,
            observer: self.observer,
            cancel: CancellationToken::new(),
            notify_tx,
        });

        let workers = spawn_pool(Arc::clone(&ctx), queue_rx);
        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&ctx),
            root,
            filter,
            watch.then_some(notify_rx),
            queue_tx,
        ));

        Ok(IngestionHandle {
            ctx,
            dispatcher,
            workers,
            watcher,
        })
    }
}

/// Control handle for a running pipeline
pub struct IngestionHandle {
    ctx: Arc<PipelineContext>,
    dispatcher: JoinHandle<()>,
    workers: JoinHandle<()>,
    watcher: Option<SourceWatcher>,
}

impl IngestionHandle {
    /// Stop accepting new files; queued files are drained or left for the
    /// next run depending on `workers.drain_on_shutdown`
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.ctx.cancel.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }

    pub fn summary(&self) -> RunSummary {
        self.ctx.registry.summary()
    }

    /// Terminal records, oldest first
    pub fn records(&self) -> Vec<IngestionRecord> {
        self.ctx.registry.records()
    }

    pub fn registry(&self) -> InflightRegistry {
        self.ctx.registry.clone()
    }

    pub fn watch_mode(&self) -> Option<WatchMode> {
        self.watcher.as_ref().map(SourceWatcher::mode)
    }

    /// Inject a notification as if the watcher had reported `path`
    ///
    /// Only has an effect while the pipeline is watching.
    pub fn notify(&self, path: impl Into<PathBuf>) -> bool {
        self.ctx.notify_tx.send(path.into()).is_ok()
    }

    /// Wait for the pipeline to stop and return the final counts
    pub async fn join(self) -> RunSummary {
        let Self {
            ctx,
            dispatcher,
            workers,
            watcher,
        } = self;

        if let Err(e) = dispatcher.await {
            error!(error = %e, "Dispatcher task failed");
        }
        drop(watcher);
        if let Err(e) = workers.await {
            error!(error = %e, "Worker supervisor failed");
        }

        let summary = ctx.registry.summary();
        info!(%summary, "Pipeline stopped");
        summary
    }
}

async fn dispatch(
    ctx: Arc<PipelineContext>,
    root: PathBuf,
    filter: CandidateFilter,
    notifications: Option<mpsc::UnboundedReceiver<PathBuf>>,
    queue: mpsc::Sender<WorkItem>,
) {
    let candidates = TaskTracker::new();

    let recursive = ctx.config.source.recursive;
    let scan_root = root.clone();
    match tokio::task::spawn_blocking(move || scan_directory(&scan_root, recursive, &filter)).await {
        Ok(Ok(files)) => {
            info!(root = %root.display(), files = files.len(), "Startup scan complete");
            for path in files {
                candidates.spawn(handle_candidate(Arc::clone(&ctx), queue.clone(), path));
            }
        },
        Ok(Err(e)) => warn!(root = %root.display(), error = %e, "Startup scan failed"),
        Err(e) => warn!(error = %e, "Startup scan task failed"),
    }

    if let Some(mut notifications) = notifications {
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                next = notifications.recv() => match next {
                    Some(path) => {
                        candidates.spawn(handle_candidate(Arc::clone(&ctx), queue.clone(), normalize(&path)));
                    },
                    None => break,
                },
            }
        }
    }

    candidates.close();
    candidates.wait().await;
    // Dropping the last sender lets draining workers finish
    drop(queue);
}

enum Stability {
    Stable(SourceFile),
    Unstable,
    Gone,
    Cancelled,
}

async fn stabilize(ctx: &PipelineContext, path: &Path) -> Stability {
    let first = match SourceFile::sample(path) {
        Ok(sample) => sample,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Candidate vanished");
            return Stability::Gone;
        },
    };

    tokio::select! {
        _ = ctx.cancel.cancelled() => return Stability::Cancelled,
        _ = tokio::time::sleep(ctx.config.source.stability_delay()) => {},
    }

    let second = match SourceFile::sample(path) {
        Ok(sample) => sample,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Candidate vanished");
            return Stability::Gone;
        },
    };

    if first.is_stable_against(&second) {
        Stability::Stable(first.confirm(&second))
    } else {
        debug!(
            path = %path.display(),
            first = first.first_size,
            second = second.first_size,
            "File still being written"
        );
        Stability::Unstable
    }
}

/// Inspect, re-reading a few times while the content cannot be classified
async fn inspect(ctx: &PipelineContext, file: &mut SourceFile) -> IntegrityVerdict {
    let verdict = ctx.inspector.inspect_source(file);
    if verdict != IntegrityVerdict::Unknown {
        return verdict;
    }

    let policy = RetryPolicy::new(
        ctx.config.retry.max_attempts,
        Backoff::Fixed(ctx.config.source.stability_delay()),
    );
    let path = file.path.clone();
    let result = retry::run(
        &policy,
        |verdict: &IntegrityVerdict| *verdict == IntegrityVerdict::Unknown,
        |attempt| {
            let path = path.clone();
            async move {
                // The first attempt is the read above
                if attempt == 1 {
                    return Err(IntegrityVerdict::Unknown);
                }
                match ctx.inspector.inspect(&path) {
                    IntegrityVerdict::Unknown => Err(IntegrityVerdict::Unknown),
                    verdict => Ok(verdict),
                }
            }
        },
    )
    .await;

    let verdict = result.unwrap_or_else(retry::RetryError::into_inner);
    if verdict != IntegrityVerdict::Unknown {
        // Refresh the stored signature to match
        ctx.inspector.inspect_source(file);
    }
    verdict
}

#[tracing::instrument(skip_all, fields(path = %path.display()))]
async fn handle_candidate(ctx: Arc<PipelineContext>, queue: mpsc::Sender<WorkItem>, path: PathBuf) {
    if ctx.cancel.is_cancelled() {
        return;
    }

    match ctx.registry.try_claim(&path) {
        Claim::Acquired(id) => debug!(%id, "Claimed file"),
        Claim::InFlight(status) => {
            debug!(%status, "Already in flight, ignoring notification");
            return;
        },
    }

    let mut file = match stabilize(&ctx, &path).await {
        Stability::Stable(file) => file,
        Stability::Unstable => {
            ctx.release(&path);
            return;
        },
        Stability::Gone | Stability::Cancelled => {
            ctx.registry.release(&path);
            return;
        },
    };

    let verdict = inspect(&ctx, &mut file).await;
    ctx.registry.set_verdict(&path, verdict);
    debug!(%verdict, size = file.size(), media = ?file.media_kind, "Inspected file");

    let transfer_anyway = match verdict {
        IntegrityVerdict::Valid => false,
        IntegrityVerdict::Unknown => match ctx.config.integrity.unknown_policy {
            UnknownPolicy::Retry => {
                info!("Content not identifiable yet, waiting for the next notification");
                ctx.registry.release(&path);
                return;
            },
            UnknownPolicy::Quarantine => {
                quarantine(&ctx, &path, verdict).await;
                return;
            },
            UnknownPolicy::Transfer => true,
        },
        _ => {
            quarantine(&ctx, &path, verdict).await;
            return;
        },
    };

    if let Err(e) = ctx.registry.advance(&path, IngestionStatus::Validated) {
        warn!(error = %e, "Cannot validate record");
        ctx.registry.release(&path);
        return;
    }

    let force = ctx.config.integrity.force_default_extension;
    let path = match ctx.inspector.repair_extension(&path, verdict, force) {
        Ok(repaired) if repaired == path => path,
        Ok(repaired) => {
            if !ctx.registry.rekey(&path, &repaired) {
                // The renamed file was claimed by its own notification
                debug!(to = %repaired.display(), "Renamed file already claimed");
                ctx.registry.release(&path);
                return;
            }
            repaired
        },
        Err(e) => {
            warn!(error = %e, "Extension repair failed, leaving file in place");
            ctx.complete(
                &path,
                RecordOutcome::Failed {
                    error: IngestError::filesystem(e.to_string()),
                },
            );
            return;
        },
    };

    if let Err(e) = ctx.registry.advance(&path, IngestionStatus::Queued) {
        warn!(error = %e, "Cannot queue record");
        ctx.registry.release(&path);
        return;
    }
    if transfer_anyway {
        info!(path = %path.display(), "Transferring unidentified file per policy");
    }

    let item = WorkItem { path: path.clone() };
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            debug!(path = %path.display(), "Shutdown before enqueue");
            ctx.registry.release(&path);
        },
        sent = queue.send(item) => {
            if sent.is_err() {
                ctx.registry.release(&path);
            } else {
                debug!(path = %path.display(), "Queued for transfer");
            }
        },
    }
}

async fn quarantine(ctx: &PipelineContext, path: &Path, verdict: IntegrityVerdict) {
    let dir = ctx.config.integrity.quarantine_dir.clone();
    let policy = ctx.config.integrity.quarantine_policy;
    let source = path.to_path_buf();

    let outcome = match tokio::task::spawn_blocking(move || quarantine_file(&source, &dir, policy)).await {
        Ok(Ok(moved)) => RecordOutcome::Quarantined {
            verdict,
            destination: moved.destination().map(Path::to_path_buf),
        },
        Ok(Err(error)) => {
            warn!(path = %path.display(), %error, "Quarantine failed, leaving file in place");
            RecordOutcome::Failed { error }
        },
        Err(e) => RecordOutcome::Failed {
            error: IngestError::Fatal {
                attempts: 0,
                reason: format!("quarantine task failed: {e}"),
            },
        },
    };
    ctx.complete(path, outcome);
}
