//! Shared helpers for the pipeline integration tests
#![allow(dead_code)]

use photoferry_core::config::{BackoffKind, PipelineConfig};
use photoferry_core::ingest::{IngestError, IngestionObserver, IngestionRecord, SourceDisposition};
use photoferry_core::inspect::{IntegrityVerdict, EOI_MARKER, SOI_MARKER};
use photoferry_core::transfer::{
    ProtocolKind, ProtocolTransfer, SessionHandle, TransferError, TransferSession, TransferStrategy,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What a scripted variant does on upload
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(TransferError),
    /// Panic for this remote name, succeed otherwise
    PanicOn(&'static str),
}

/// `ProtocolTransfer` double that never touches the network
pub struct ScriptedTransfer {
    kind: ProtocolKind,
    script: Script,
    upload_delay: Duration,
    connects: AtomicUsize,
    uploads: Mutex<Vec<String>>,
}

impl ScriptedTransfer {
    pub fn new(kind: ProtocolKind, script: Script) -> Arc<Self> {
        Self::with_delay(kind, script, Duration::ZERO)
    }

    pub fn with_delay(kind: ProtocolKind, script: Script, upload_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script,
            upload_delay,
            connects: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Remote names stored successfully, in order
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

impl ProtocolTransfer for ScriptedTransfer {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    fn connect(&self, _: &TransferStrategy) -> Result<TransferSession, TransferError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(TransferSession::new(self.kind, SessionHandle::Opaque(Box::new(()))))
    }

    fn ensure_directory(&self, session: &mut TransferSession, remote_dir: &str) -> Result<(), TransferError> {
        session.set_directory(remote_dir);
        Ok(())
    }

    fn upload(
        &self,
        _: &mut TransferSession,
        local_path: &Path,
        remote_name: &str,
        _: &TransferStrategy,
    ) -> Result<u64, TransferError> {
        if !self.upload_delay.is_zero() {
            std::thread::sleep(self.upload_delay);
        }
        match &self.script {
            Script::Fail(error) => Err(error.clone()),
            Script::PanicOn(name) if remote_name == *name => panic!("scripted panic for {name}"),
            Script::Succeed | Script::PanicOn(_) => {
                let bytes = std::fs::metadata(local_path)
                    .map_err(|e| TransferError::from_local_io(&e))?
                    .len();
                self.uploads.lock().unwrap().push(remote_name.to_string());
                Ok(bytes)
            },
        }
    }

    fn disconnect(&self, _: TransferSession) {}
}

/// Records every callback
#[derive(Default)]
pub struct RecordingObserver {
    pub purge: bool,
    pub transferred: Mutex<Vec<PathBuf>>,
    pub quarantined: Mutex<Vec<(PathBuf, IntegrityVerdict)>>,
    pub exhausted: Mutex<Vec<(PathBuf, IngestError)>>,
}

impl RecordingObserver {
    pub fn purging() -> Self {
        Self {
            purge: true,
            ..Self::default()
        }
    }

    pub fn transferred(&self) -> Vec<PathBuf> {
        self.transferred.lock().unwrap().clone()
    }

    pub fn quarantined(&self) -> Vec<(PathBuf, IntegrityVerdict)> {
        self.quarantined.lock().unwrap().clone()
    }

    pub fn exhausted(&self) -> Vec<(PathBuf, IngestError)> {
        self.exhausted.lock().unwrap().clone()
    }
}

impl IngestionObserver for RecordingObserver {
    fn on_transferred(&self, record: &IngestionRecord) -> SourceDisposition {
        self.transferred.lock().unwrap().push(record.path.clone());
        if self.purge && std::fs::remove_file(&record.path).is_ok() {
            SourceDisposition::Purged
        } else {
            SourceDisposition::Kept
        }
    }

    fn on_quarantined(&self, record: &IngestionRecord, verdict: IntegrityVerdict) {
        self.quarantined.lock().unwrap().push((record.path.clone(), verdict));
    }

    fn on_exhausted(&self, record: &IngestionRecord, last_error: &IngestError) {
        self.exhausted.lock().unwrap().push((record.path.clone(), last_error.clone()));
    }
}

/// A complete JPEG of roughly `len` bytes
pub fn jpeg(len: usize) -> Vec<u8> {
    let mut bytes = SOI_MARKER.to_vec();
    bytes.resize(len.max(SOI_MARKER.len()), 0x42);
    bytes.extend_from_slice(&EOI_MARKER);
    bytes
}

pub fn single_strategy() -> Vec<TransferStrategy> {
    vec![TransferStrategy::new("standard", 8192, Duration::from_secs(5))]
}

/// Fast pipeline settings rooted in `source`, with scratch directories under `scratch`
pub fn test_config(source: &Path, scratch: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.source.directory = source.to_path_buf();
    config.source.stability_delay_ms = 100;
    config.source.force_polling = true;
    config.source.poll_interval_ms = 60_000;
    config.retry.max_attempts = 2;
    config.retry.backoff = BackoffKind::Fixed;
    config.retry.base_delay_ms = 10;
    config.integrity.quarantine_dir = scratch.join("quarantine");
    config.local_backup.directory = scratch.join("backup");
    config
}

/// Canonical form of a temp directory, matching the paths the pipeline reports
pub fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap()
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
