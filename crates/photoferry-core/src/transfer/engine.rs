//! Strategy and protocol fallback

use super::{
    FtpEndpoint, FtpTransfer, LocalBackupSink, ProtocolKind, ProtocolTransfer, SftpEndpoint,
    SftpTransfer, TransferError, TransferStrategy,
};
use crate::config::PipelineConfig;
use crate::retry::Retryable;
use chrono::{DateTime, Utc};
use photoferry_common::{FerryError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Step an attempt was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStage {
    Connecting,
    Authenticating,
    EnsuringDirectory,
    Uploading,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success {
        bytes: u64,
    },
    Failed {
        stage: AttemptStage,
        kind: &'static str,
        message: String,
        #[serde(skip)]
        error: TransferError,
    },
}

/// One strategy tried against one protocol variant
#[derive(Debug, Clone, Serialize)]
pub struct TransferAttempt {
    pub protocol: ProtocolKind,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

impl TransferAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }

    pub fn error(&self) -> Option<&TransferError> {
        match &self.outcome {
            AttemptOutcome::Failed { error, .. } => Some(error),
            AttemptOutcome::Success { .. } => None,
        }
    }
}

/// Attempts against one protocol, folded together
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolSummary {
    pub protocol: ProtocolKind,
    pub strategies_tried: usize,
    pub succeeded: bool,
    pub last_error: Option<String>,
}

fn summarize(attempts: &[TransferAttempt]) -> Vec<ProtocolSummary> {
    let mut summaries: Vec<ProtocolSummary> = Vec::new();
    for attempt in attempts {
        let index = match summaries.iter().position(|s| s.protocol == attempt.protocol) {
            Some(index) => index,
            None => {
                summaries.push(ProtocolSummary {
                    protocol: attempt.protocol,
                    strategies_tried: 0,
                    succeeded: false,
                    last_error: None,
                });
                summaries.len() - 1
            },
        };
        let summary = &mut summaries[index];
        summary.strategies_tried += 1;
        summary.succeeded |= attempt.succeeded();
        if let Some(error) = attempt.error() {
            summary.last_error = Some(error.to_string());
        }
    }
    summaries
}

/// Where a file ended up
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub protocol: ProtocolKind,
    pub strategy: String,
    pub remote_path: String,
    pub bytes: u64,
}

/// Successful run of the fallback chain
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub local_path: PathBuf,
    pub delivery: Delivery,
    pub attempts: Vec<TransferAttempt>,
}

impl TransferReport {
    /// One entry per protocol tried, in chain order
    pub fn by_protocol(&self) -> Vec<ProtocolSummary> {
        summarize(&self.attempts)
    }
}

/// Every strategy on every variant failed
#[derive(Debug, Clone, Error)]
#[error("all {} transfer attempt(s) failed, last error: {last_error}", .attempts.len())]
pub struct ChainExhausted {
    pub attempts: Vec<TransferAttempt>,
    pub last_error: TransferError,
}

impl ChainExhausted {
    pub fn by_protocol(&self) -> Vec<ProtocolSummary> {
        summarize(&self.attempts)
    }
}

impl Retryable for ChainExhausted {
    /// Worth running the chain again when any attempt hit a transient failure
    fn is_retryable(&self) -> bool {
        self.attempts
            .iter()
            .filter_map(TransferAttempt::error)
            .any(TransferError::is_retryable)
            || self.last_error.is_retryable()
    }
}

/// Connectivity check result for one variant
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub protocol: ProtocolKind,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives the configured protocol chain
#[derive(Clone)]
pub struct TransferEngine {
    chain: Vec<Arc<dyn ProtocolTransfer>>,
    strategies: Arc<Vec<TransferStrategy>>,
    remote_directory: String,
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("chain", &self.chain())
            .field("strategies", &self.strategies)
            .field("remote_directory", &self.remote_directory)
            .finish()
    }
}

impl TransferEngine {
    pub fn new(
        chain: Vec<Arc<dyn ProtocolTransfer>>,
        strategies: Vec<TransferStrategy>,
        remote_directory: impl Into<String>,
    ) -> Self {
        Self {
            chain,
            strategies: Arc::new(strategies),
            remote_directory: remote_directory.into(),
        }
    }

    /// Build the variants named by the configuration, in fallback order
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let order = config.effective_fallback_order();
        if order.is_empty() {
            return Err(FerryError::config("no transfer protocols configured"));
        }
        if config.strategies.is_empty() {
            return Err(FerryError::config("no transfer strategies configured"));
        }

        let chain = order
            .into_iter()
            .map(|kind| -> Arc<dyn ProtocolTransfer> {
                match kind {
                    ProtocolKind::PlainFtp | ProtocolKind::ExplicitFtps | ProtocolKind::ImplicitFtps => {
                        Arc::new(FtpTransfer::new(kind, FtpEndpoint::from_config(config, kind)))
                    },
                    ProtocolKind::Sftp => Arc::new(SftpTransfer::new(SftpEndpoint::from_config(config))),
                    ProtocolKind::LocalBackup => {
                        Arc::new(LocalBackupSink::new(config.local_backup.directory.clone()))
                    },
                }
            })
            .collect();

        Ok(Self::new(
            chain,
            config.strategies.clone(),
            config.server.remote_directory.clone(),
        ))
    }

    pub fn chain(&self) -> Vec<ProtocolKind> {
        self.chain.iter().map(|variant| variant.kind()).collect()
    }

    pub fn strategies(&self) -> &[TransferStrategy] {
        &self.strategies
    }

    /// Upload `local_path` through the fallback chain
    ///
    /// Variants are tried in order, each with every strategy in order, until
    /// one strategy succeeds. An authentication failure skips the remaining
    /// strategies of that variant only.
    pub async fn transfer(&self, local_path: &Path) -> std::result::Result<TransferReport, ChainExhausted> {
        let remote_name = match local_path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => {
                return Err(ChainExhausted {
                    attempts: Vec::new(),
                    last_error: TransferError::LocalIo(format!(
                        "{} has no file name",
                        local_path.display()
                    )),
                });
            },
        };

        let mut attempts = Vec::new();
        let mut last_error = TransferError::LocalIo("no transfer protocols configured".to_string());

        for variant in &self.chain {
            let kind = variant.kind();
            let task = {
                let variant = Arc::clone(variant);
                let strategies = Arc::clone(&self.strategies);
                let local_path = local_path.to_path_buf();
                let remote_dir = self.remote_directory.clone();
                let remote_name = remote_name.clone();
                move || run_variant(variant.as_ref(), &strategies, &local_path, &remote_dir, &remote_name)
            };

            let (variant_attempts, result) = match tokio::task::spawn_blocking(task).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    return Err(ChainExhausted {
                        attempts,
                        last_error: TransferError::LocalIo(format!("transfer task cancelled: {e}")),
                    });
                },
            };
            attempts.extend(variant_attempts);

            match result {
                Ok(delivery) => {
                    info!(
                        path = %local_path.display(),
                        protocol = %delivery.protocol,
                        strategy = %delivery.strategy,
                        bytes = delivery.bytes,
                        attempts = attempts.len(),
                        "Transferred file"
                    );
                    return Ok(TransferReport {
                        local_path: local_path.to_path_buf(),
                        delivery,
                        attempts,
                    });
                },
                Err(error) => {
                    warn!(
                        path = %local_path.display(),
                        protocol = %kind,
                        error = %error,
                        "Protocol exhausted, falling back"
                    );
                    last_error = error;
                },
            }
        }

        Err(ChainExhausted {
            attempts,
            last_error,
        })
    }

    /// Connect and ensure the remote directory on every variant, without uploading
    pub async fn probe(&self) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(self.chain.len());
        let Some(strategy) = self.strategies.first().cloned() else {
            return results;
        };

        for variant in &self.chain {
            let protocol = variant.kind();
            let task = {
                let variant = Arc::clone(variant);
                let strategy = strategy.clone();
                let remote_dir = self.remote_directory.clone();
                move || {
                    let started = Instant::now();
                    let outcome = variant.connect(&strategy).and_then(|mut session| {
                        let ensured = variant.ensure_directory(&mut session, &remote_dir);
                        variant.disconnect(session);
                        ensured
                    });
                    (started.elapsed(), outcome)
                }
            };

            let (elapsed, outcome) = match tokio::task::spawn_blocking(task).await {
                Ok(result) => result,
                Err(e) => (
                    Duration::ZERO,
                    Err(TransferError::LocalIo(format!("probe task failed: {e}"))),
                ),
            };

            results.push(ProbeResult {
                protocol,
                elapsed_ms: elapsed.as_millis().try_into().unwrap_or(u64::MAX),
                error: outcome.err().map(|e| e.to_string()),
            });
        }

        results
    }
}

type VariantOutcome = (Vec<TransferAttempt>, std::result::Result<Delivery, TransferError>);

/// Try every strategy on one variant; runs on the blocking pool
fn run_variant(
    variant: &dyn ProtocolTransfer,
    strategies: &[TransferStrategy],
    local_path: &Path,
    remote_dir: &str,
    remote_name: &str,
) -> VariantOutcome {
    let kind = variant.kind();
    let mut attempts = Vec::with_capacity(strategies.len());
    let mut last_error = TransferError::LocalIo(format!("{kind} has no strategies"));

    for strategy in strategies {
        let started_at = Utc::now();
        let result = attempt_once(variant, strategy, local_path, remote_dir, remote_name);
        let ended_at = Utc::now();

        match result {
            Ok(bytes) => {
                attempts.push(TransferAttempt {
                    protocol: kind,
                    strategy: strategy.name.clone(),
                    started_at,
                    ended_at,
                    outcome: AttemptOutcome::Success { bytes },
                });
                let delivery = Delivery {
                    protocol: kind,
                    strategy: strategy.name.clone(),
                    remote_path: super::remote_join(remote_dir, remote_name),
                    bytes,
                };
                return (attempts, Ok(delivery));
            },
            Err((stage, error)) => {
                warn!(
                    protocol = %kind,
                    strategy = %strategy.name,
                    ?stage,
                    error = %error,
                    "Transfer strategy failed"
                );
                attempts.push(TransferAttempt {
                    protocol: kind,
                    strategy: strategy.name.clone(),
                    started_at,
                    ended_at,
                    outcome: AttemptOutcome::Failed {
                        stage,
                        kind: error.kind(),
                        message: error.to_string(),
                        error: error.clone(),
                    },
                });
                let auth_failed = matches!(error, TransferError::Auth(_));
                last_error = error;
                if auth_failed {
                    debug!(protocol = %kind, "Authentication rejected, skipping remaining strategies");
                    break;
                }
            },
        }
    }

    (attempts, Err(last_error))
}

/// Idle -> Connecting -> Authenticating -> DirectoryEnsured -> Uploading
///
/// The session is released on every path out of here.
fn attempt_once(
    variant: &dyn ProtocolTransfer,
    strategy: &TransferStrategy,
    local_path: &Path,
    remote_dir: &str,
    remote_name: &str,
) -> std::result::Result<u64, (AttemptStage, TransferError)> {
    let mut session = variant.connect(strategy).map_err(|error| {
        let stage = if matches!(error, TransferError::Auth(_)) {
            AttemptStage::Authenticating
        } else {
            AttemptStage::Connecting
        };
        (stage, error)
    })?;

    let result = variant
        .ensure_directory(&mut session, remote_dir)
        .map_err(|e| (AttemptStage::EnsuringDirectory, e))
        .and_then(|_| {
            variant
                .upload(&mut session, local_path, remote_name, strategy)
                .map_err(|e| (AttemptStage::Uploading, e))
        });

    variant.disconnect(session);
    result
}
