//! Observers the CLI wires into the pipeline

use photoferry_core::config::PipelineConfig;
use photoferry_core::ingest::{IngestionObserver, IngestionRecord, LoggingObserver, ObserverSet, SourceDisposition};
use std::sync::Arc;
use tracing::{info, warn};

/// Removes the local file once its transfer is confirmed
#[derive(Debug, Default, Clone, Copy)]
pub struct DeleteSourceObserver;

impl IngestionObserver for DeleteSourceObserver {
    fn on_transferred(&self, record: &IngestionRecord) -> SourceDisposition {
        match std::fs::remove_file(&record.path) {
            Ok(()) => {
                info!(path = %record.path.display(), "Removed transferred file from source");
                SourceDisposition::Purged
            },
            Err(e) => {
                warn!(path = %record.path.display(), error = %e, "Failed to remove transferred file");
                SourceDisposition::Kept
            },
        }
    }
}

/// Logging, plus source deletion when `after_transfer.delete_source` is set
pub fn for_config(config: &PipelineConfig) -> Arc<dyn IngestionObserver> {
    let observers = ObserverSet::new().with(Arc::new(LoggingObserver));
    if config.after_transfer.delete_source {
        Arc::new(observers.with(Arc::new(DeleteSourceObserver)))
    } else {
        Arc::new(observers)
    }
}
