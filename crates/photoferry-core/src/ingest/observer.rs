use super::record::IngestionRecord;
use super::IngestError;
use crate::inspect::IntegrityVerdict;
use std::sync::Arc;
use tracing::{info, warn};

/// What the transferred-callback did with the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDisposition {
    Kept,
    Purged,
}

/// Callbacks fired once per terminal record
///
/// Called from worker tasks; implementations should be quick and must not
/// block on the pipeline itself.
pub trait IngestionObserver: Send + Sync {
    /// The file reached the remote store. Returning `Purged` marks the record
    /// `PurgedFromSource`.
    fn on_transferred(&self, record: &IngestionRecord) -> SourceDisposition {
        let _ = record;
        SourceDisposition::Kept
    }

    fn on_quarantined(&self, record: &IngestionRecord, verdict: IntegrityVerdict) {
        let _ = (record, verdict);
    }

    /// The record ended `Failed`; it will not be retried automatically
    fn on_exhausted(&self, record: &IngestionRecord, last_error: &IngestError) {
        let _ = (record, last_error);
    }
}

/// Logs every terminal record
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl IngestionObserver for LoggingObserver {
    fn on_transferred(&self, record: &IngestionRecord) -> SourceDisposition {
        info!(report = %record.describe(), "File transferred");
        SourceDisposition::Kept
    }

    fn on_quarantined(&self, record: &IngestionRecord, verdict: IntegrityVerdict) {
        warn!(report = %record.describe(), %verdict, "File quarantined");
    }

    fn on_exhausted(&self, record: &IngestionRecord, last_error: &IngestError) {
        warn!(report = %record.describe(), error = %last_error, "File not transferred");
    }
}

/// Fans callbacks out to several observers in order
///
/// The source counts as purged when any observer purged it.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn IngestionObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn IngestionObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl IngestionObserver for ObserverSet {
    fn on_transferred(&self, record: &IngestionRecord) -> SourceDisposition {
        let mut disposition = SourceDisposition::Kept;
        for observer in &self.observers {
            if observer.on_transferred(record) == SourceDisposition::Purged {
                disposition = SourceDisposition::Purged;
            }
        }
        disposition
    }

    fn on_quarantined(&self, record: &IngestionRecord, verdict: IntegrityVerdict) {
        for observer in &self.observers {
            observer.on_quarantined(record, verdict);
        }
    }

    fn on_exhausted(&self, record: &IngestionRecord, last_error: &IngestError) {
        for observer in &self.observers {
            observer.on_exhausted(record, last_error);
        }
    }
}
