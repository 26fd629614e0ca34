use crate::inspect::IntegrityVerdict;
use crate::transfer::TransferError;
use serde::Serialize;
use thiserror::Error;

/// Why a record ended up `Failed` or `Quarantined`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestError {
    /// Content failed inspection; routed to quarantine, never retried
    #[error("integrity check failed: {verdict}")]
    Integrity { verdict: IntegrityVerdict },

    /// Rename, move or permission failure; the file is left where it was
    #[error("filesystem error: {message}")]
    Filesystem { message: String },

    #[error("transfer failed after {attempts} attempt(s): {last}")]
    ExhaustedRetries { attempts: u32, last: TransferError },

    /// Non-retryable transfer failure or a crashed worker
    #[error("fatal error after {attempts} attempt(s): {reason}")]
    Fatal { attempts: u32, reason: String },

    #[error("pipeline shut down before the file was transferred")]
    Shutdown,
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Integrity { .. } => "integrity",
            IngestError::Filesystem { .. } => "filesystem",
            IngestError::ExhaustedRetries { .. } => "exhausted_retries",
            IngestError::Fatal { .. } => "fatal",
            IngestError::Shutdown => "shutdown",
        }
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        IngestError::Filesystem {
            message: message.into(),
        }
    }
}
