//! Source watching, stability checks and the transfer worker pool
//!
//! ```text
//! watcher ──paths──> dispatcher ──> candidate task (claim, stabilize, inspect, repair)
//!                                         │
//!                              bounded queue (backpressure)
//!                                         │
//!                                  worker pool ──> TransferEngine
//! ```
//!
//! The [`InflightRegistry`] is the single shared structure between the
//! stages; it guarantees at most one live record per path.

mod coordinator;
mod error;
mod inflight;
mod observer;
mod quarantine;
pub(crate) mod record;
mod watcher;
mod worker;

pub use coordinator::{IngestionCoordinator, IngestionHandle};
pub use error::IngestError;
pub use inflight::{Claim, InflightRegistry, RecordOutcome, RunSummary};
pub use observer::{IngestionObserver, LoggingObserver, ObserverSet, SourceDisposition};
pub use quarantine::{quarantine_file, QuarantineOutcome};
pub use record::{IngestionRecord, IngestionStatus, InvalidTransition};
pub use watcher::{scan_directory, CandidateFilter, SourceWatcher, WatchMode};
