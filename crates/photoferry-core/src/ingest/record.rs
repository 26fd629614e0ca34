//! Per-file lifecycle records

use super::IngestError;
use crate::inspect::IntegrityVerdict;
use crate::transfer::ProtocolKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of one file
///
/// `Discovered -> Stabilizing -> Validated -> Queued -> Transferring ->
/// {Transferred | Failed} -> PurgedFromSource`, with `Quarantined` as the
/// terminal state for files that fail inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Discovered,
    Stabilizing,
    Validated,
    Queued,
    Transferring,
    Transferred,
    Failed,
    Quarantined,
    PurgedFromSource,
}

impl IngestionStatus {
    /// Statuses that own the path in the in-flight set
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            IngestionStatus::Discovered
                | IngestionStatus::Stabilizing
                | IngestionStatus::Validated
                | IngestionStatus::Queued
                | IngestionStatus::Transferring
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }

    /// Allowed forward transitions; `Failed` is reachable from every in-flight state
    pub fn can_advance_to(self, next: IngestionStatus) -> bool {
        use IngestionStatus::*;
        match (self, next) {
            (from, Failed) => from.is_in_flight(),
            (Discovered, Stabilizing)
            | (Stabilizing, Validated)
            | (Stabilizing, Quarantined)
            | (Validated, Queued)
            | (Validated, Quarantined)
            | (Queued, Transferring)
            | (Transferring, Transferred)
            | (Transferred, PurgedFromSource) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IngestionStatus::Discovered => "discovered",
            IngestionStatus::Stabilizing => "stabilizing",
            IngestionStatus::Validated => "validated",
            IngestionStatus::Queued => "queued",
            IngestionStatus::Transferring => "transferring",
            IngestionStatus::Transferred => "transferred",
            IngestionStatus::Failed => "failed",
            IngestionStatus::Quarantined => "quarantined",
            IngestionStatus::PurgedFromSource => "purged_from_source",
        }
    }
}

impl std::fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid lifecycle transition {from} -> {to} for {}", .path.display())]
pub struct InvalidTransition {
    pub path: PathBuf,
    pub from: IngestionStatus,
    pub to: IngestionStatus,
}

/// Everything known about one file's trip through the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct IngestionRecord {
    pub id: Uuid,

    /// Current location; changes when the extension is repaired
    pub path: PathBuf,

    /// Location at discovery time
    pub original_path: PathBuf,

    pub status: IngestionStatus,
    pub verdict: Option<IntegrityVerdict>,

    /// Runs of the transfer fallback chain
    pub attempts: u32,

    /// Individual strategy attempts across all runs
    pub transfer_attempts: usize,

    pub delivered_via: Option<ProtocolKind>,
    pub quarantined_to: Option<PathBuf>,
    pub error: Option<IngestError>,
    pub discovered_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IngestionRecord {
    pub fn new(path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_path: path.clone(),
            path,
            status: IngestionStatus::Discovered,
            verdict: None,
            attempts: 0,
            transfer_attempts: 0,
            delivered_via: None,
            quarantined_to: None,
            error: None,
            discovered_at: Utc::now(),
            finished_at: None,
        }
    }

    /// One-line operator report: path, outcome, verdict or error kind, attempts
    pub fn describe(&self) -> String {
        let detail = match (&self.error, self.verdict, self.delivered_via) {
            (Some(error), _, _) => error.kind().to_string(),
            (None, _, Some(protocol)) => format!("via {protocol}"),
            (None, Some(verdict), None) => verdict.to_string(),
            (None, None, None) => "-".to_string(),
        };
        format!(
            "{} {} ({}, {} attempt(s))",
            self.status,
            self.path.display(),
            detail,
            self.attempts
        )
    }
}
