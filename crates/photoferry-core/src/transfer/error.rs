//! Transfer error taxonomy

use crate::retry::Retryable;
use serde::Serialize;
use std::io;
use thiserror::Error;

/// Coarse grouping used for reporting and fallback decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Timeouts, resets, TLS session not resumed: worth another try
    Transient,
    /// Bad credentials: no further strategies on this protocol
    Auth,
    /// TLS handshake or data-channel protection failure
    ProtocolNegotiation,
    /// Local or remote storage refused the file
    Filesystem,
    /// Any other definitive refusal by the server
    Remote,
}

/// Failure of one connect, directory or upload step
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TransferError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("TLS session of data connection not resumed: {0}")]
    SessionNotResumed(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol negotiation failed: {0}")]
    Negotiation(String),

    #[error("remote directory error: {0}")]
    Directory(String),

    #[error("storage full: {0}")]
    StorageFull(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("local I/O error: {0}")]
    LocalIo(String),
}

impl TransferError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferError::Timeout(_)
            | TransferError::ConnectionReset(_)
            | TransferError::SessionNotResumed(_)
            | TransferError::ServiceUnavailable(_) => ErrorCategory::Transient,
            TransferError::Auth(_) => ErrorCategory::Auth,
            TransferError::Negotiation(_) => ErrorCategory::ProtocolNegotiation,
            TransferError::StorageFull(_)
            | TransferError::PermissionDenied(_)
            | TransferError::LocalIo(_) => ErrorCategory::Filesystem,
            TransferError::Directory(_) | TransferError::Rejected(_) => ErrorCategory::Remote,
        }
    }

    /// Stable identifier for reports
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::Timeout(_) => "timeout",
            TransferError::ConnectionReset(_) => "connection_reset",
            TransferError::SessionNotResumed(_) => "session_not_resumed",
            TransferError::ServiceUnavailable(_) => "service_unavailable",
            TransferError::Auth(_) => "auth",
            TransferError::Negotiation(_) => "negotiation",
            TransferError::Directory(_) => "directory",
            TransferError::StorageFull(_) => "storage_full",
            TransferError::PermissionDenied(_) => "permission_denied",
            TransferError::Rejected(_) => "rejected",
            TransferError::LocalIo(_) => "local_io",
        }
    }

    /// Upload failures an explicit FTPS session may work around with a clear
    /// data channel
    pub fn suggests_clear_data(&self) -> bool {
        matches!(
            self,
            TransferError::SessionNotResumed(_) | TransferError::Negotiation(_)
        )
    }

    /// Classify a socket-level error from any network variant
    pub fn from_network_io(error: &io::Error) -> Self {
        let message = error.to_string();
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransferError::Timeout(message),
            io::ErrorKind::ConnectionRefused => TransferError::ServiceUnavailable(message),
            io::ErrorKind::PermissionDenied => TransferError::PermissionDenied(message),
            _ => TransferError::ConnectionReset(message),
        }
    }

    /// Classify an error from the local filesystem (reading the source,
    /// writing the backup copy)
    pub fn from_local_io(error: &io::Error) -> Self {
        let message = error.to_string();
        match error.kind() {
            io::ErrorKind::TimedOut => TransferError::Timeout(message),
            io::ErrorKind::PermissionDenied => TransferError::PermissionDenied(message),
            io::ErrorKind::StorageFull => TransferError::StorageFull(message),
            _ => TransferError::LocalIo(message),
        }
    }
}

impl Retryable for TransferError {
    fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(TransferError::Timeout("t".into()).is_retryable());
        assert!(TransferError::ConnectionReset("r".into()).is_retryable());
        assert!(TransferError::SessionNotResumed("s".into()).is_retryable());

        assert!(!TransferError::Auth("530".into()).is_retryable());
        assert!(!TransferError::StorageFull("552".into()).is_retryable());
        assert!(!TransferError::PermissionDenied("550".into()).is_retryable());
        assert!(!TransferError::Negotiation("tls".into()).is_retryable());
    }

    #[test]
    fn test_io_classification() {
        let timeout = io::Error::new(io::ErrorKind::WouldBlock, "read timed out");
        assert_eq!(TransferError::from_network_io(&timeout).kind(), "timeout");

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(TransferError::from_network_io(&refused).kind(), "service_unavailable");

        let full = io::Error::from(io::ErrorKind::StorageFull);
        assert_eq!(TransferError::from_local_io(&full).category(), ErrorCategory::Filesystem);

        let missing = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(TransferError::from_local_io(&missing).kind(), "local_io");
    }
}
