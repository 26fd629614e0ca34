//! The in-flight set: at most one live record per path

use super::record::{IngestionRecord, IngestionStatus, InvalidTransition};
use super::IngestError;
use crate::inspect::IntegrityVerdict;
use crate::transfer::ProtocolKind;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Terminal counts for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub transferred: usize,
    pub failed: usize,
    pub quarantined: usize,
    /// Claims released without a terminal state (unstable, unknown, shutdown)
    pub skipped: usize,
    /// Transferred files removed from the source afterwards
    pub purged: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} transferred, {} failed, {} quarantined, {} skipped, {} purged from source",
            self.transferred, self.failed, self.quarantined, self.skipped, self.purged
        )
    }
}

/// Result of [`InflightRegistry::try_claim`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// New record created, now `Stabilizing`
    Acquired(Uuid),
    /// Another record already owns the path
    InFlight(IngestionStatus),
}

/// How a record left the in-flight set
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Transferred {
        protocol: ProtocolKind,
        transfer_attempts: usize,
    },
    Quarantined {
        verdict: IntegrityVerdict,
        destination: Option<PathBuf>,
    },
    Failed {
        error: IngestError,
    },
}

struct Entry {
    record: IngestionRecord,
    /// A notification arrived while the record was live
    renotified: bool,
}

struct RegistryState {
    active: HashMap<PathBuf, Entry>,
    history: VecDeque<IngestionRecord>,
    history_limit: usize,
    summary: RunSummary,
}

/// Shared map of live records plus a bounded history of finished ones
///
/// Every operation takes the same lock, so claiming, advancing and finishing
/// are atomic with respect to each other.
#[derive(Clone)]
pub struct InflightRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl Default for InflightRegistry {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_REPORT_HISTORY)
    }
}

impl InflightRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                active: HashMap::new(),
                history: VecDeque::new(),
                history_limit,
                summary: RunSummary::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `path` for a new record unless one is already in flight
    pub fn try_claim(&self, path: &Path) -> Claim {
        let mut state = self.lock();
        if let Some(entry) = state.active.get_mut(path) {
            entry.renotified = true;
            return Claim::InFlight(entry.record.status);
        }

        let mut record = IngestionRecord::new(path.to_path_buf());
        record.status = IngestionStatus::Stabilizing;
        let id = record.id;
        state.active.insert(
            path.to_path_buf(),
            Entry {
                record,
                renotified: false,
            },
        );
        Claim::Acquired(id)
    }

    /// Move a live record to its next lifecycle state
    pub fn advance(&self, path: &Path, next: IngestionStatus) -> Result<(), InvalidTransition> {
        let mut state = self.lock();
        let Some(entry) = state.active.get_mut(path) else {
            return Err(InvalidTransition {
                path: path.to_path_buf(),
                from: IngestionStatus::Discovered,
                to: next,
            });
        };

        let from = entry.record.status;
        if !from.can_advance_to(next) || next.is_terminal() {
            return Err(InvalidTransition {
                path: path.to_path_buf(),
                from,
                to: next,
            });
        }

        entry.record.status = next;
        Ok(())
    }

    pub fn set_verdict(&self, path: &Path, verdict: IntegrityVerdict) {
        if let Some(entry) = self.lock().active.get_mut(path) {
            entry.record.verdict = Some(verdict);
        }
    }

    /// Count one more run of the transfer chain
    pub fn note_attempt(&self, path: &Path) -> u32 {
        match self.lock().active.get_mut(path) {
            Some(entry) => {
                entry.record.attempts += 1;
                entry.record.attempts
            },
            None => 0,
        }
    }

    /// Re-key a live record after its file was renamed
    ///
    /// Fails when another live record already owns `to`.
    pub fn rekey(&self, from: &Path, to: &Path) -> bool {
        let mut state = self.lock();
        if from == to {
            return state.active.contains_key(from);
        }
        if state.active.contains_key(to) {
            return false;
        }
        let Some(mut entry) = state.active.remove(from) else {
            return false;
        };
        entry.record.path = to.to_path_buf();
        state.active.insert(to.to_path_buf(), entry);
        true
    }

    /// Drop a live record without a terminal state
    ///
    /// Returns whether another notification arrived while it was live.
    pub fn release(&self, path: &Path) -> bool {
        let mut state = self.lock();
        match state.active.remove(path) {
            Some(entry) => {
                state.summary.skipped += 1;
                debug!(path = %path.display(), status = %entry.record.status, "Released claim");
                entry.renotified
            },
            None => false,
        }
    }

    /// Move a live record into the history with its terminal state
    ///
    /// Returns the finished record the first time only, so callers can fire
    /// their callbacks exactly once.
    pub fn finish(&self, path: &Path, outcome: RecordOutcome) -> Option<IngestionRecord> {
        let mut state = self.lock();
        let Entry { mut record, .. } = state.active.remove(path)?;

        let next = match &outcome {
            RecordOutcome::Transferred { .. } => IngestionStatus::Transferred,
            RecordOutcome::Quarantined { .. } => IngestionStatus::Quarantined,
            RecordOutcome::Failed { .. } => IngestionStatus::Failed,
        };
        if !record.status.can_advance_to(next) {
            warn!(
                path = %path.display(),
                from = %record.status,
                to = %next,
                "Finishing record out of lifecycle order"
            );
        }

        record.status = next;
        record.finished_at = Some(Utc::now());
        match outcome {
            RecordOutcome::Transferred {
                protocol,
                transfer_attempts,
            } => {
                record.delivered_via = Some(protocol);
                record.transfer_attempts += transfer_attempts;
                state.summary.transferred += 1;
            },
            RecordOutcome::Quarantined {
                verdict,
                destination,
            } => {
                record.verdict = Some(verdict);
                record.quarantined_to = destination;
                state.summary.quarantined += 1;
            },
            RecordOutcome::Failed { error } => {
                record.error = Some(error);
                state.summary.failed += 1;
            },
        }

        state.history.push_back(record.clone());
        while state.history.len() > state.history_limit {
            state.history.pop_front();
        }
        Some(record)
    }

    /// Add strategy attempts to a live record
    pub fn add_transfer_attempts(&self, path: &Path, count: usize) {
        if let Some(entry) = self.lock().active.get_mut(path) {
            entry.record.transfer_attempts += count;
        }
    }

    /// Record that a transferred file was removed from the source
    pub fn mark_purged(&self, id: Uuid) -> bool {
        let mut state = self.lock();
        let Some(record) = state.history.iter_mut().rev().find(|r| r.id == id) else {
            return false;
        };
        if !record.status.can_advance_to(IngestionStatus::PurgedFromSource) {
            return false;
        }
        record.status = IngestionStatus::PurgedFromSource;
        state.summary.purged += 1;
        true
    }

    /// Live status if in flight, otherwise the latest finished status
    pub fn status_of(&self, path: &Path) -> Option<IngestionStatus> {
        let state = self.lock();
        if let Some(entry) = state.active.get(path) {
            return Some(entry.record.status);
        }
        state
            .history
            .iter()
            .rev()
            .find(|r| r.path == path || r.original_path == path)
            .map(|r| r.status)
    }

    pub fn get(&self, path: &Path) -> Option<IngestionRecord> {
        self.lock().active.get(path).map(|entry| entry.record.clone())
    }

    pub fn in_flight(&self) -> usize {
        self.lock().active.len()
    }

    /// Finished records, oldest first
    pub fn records(&self) -> Vec<IngestionRecord> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn summary(&self) -> RunSummary {
        self.lock().summary
    }
}
