//! Owned connection handles

use super::ProtocolKind;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::path::PathBuf;
use suppaftp::NativeTlsFtpStream;
use uuid::Uuid;

/// TLS coverage of an FTP session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSecurity {
    /// No TLS at all (plain FTP)
    Clear,
    /// Control and data connections protected (`PROT P`)
    Tls,
    /// Control connection protected, data connections in the clear (`PROT C`)
    ClearData,
}

/// Protocol-specific connection state
pub enum SessionHandle {
    Ftp {
        stream: NativeTlsFtpStream,
        security: ChannelSecurity,
    },
    Sftp {
        session: ssh2::Session,
        sftp: ssh2::Sftp,
    },
    Local {
        root: PathBuf,
    },
    /// State of an out-of-tree [`ProtocolTransfer`](super::ProtocolTransfer)
    /// implementation
    Opaque(Box<dyn Any + Send>),
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionHandle::Ftp { security, .. } => {
                f.debug_struct("Ftp").field("security", security).finish()
            },
            SessionHandle::Sftp { .. } => f.write_str("Sftp"),
            SessionHandle::Local { root } => f.debug_struct("Local").field("root", root).finish(),
            SessionHandle::Opaque(_) => f.write_str("Opaque"),
        }
    }
}

/// A live connection bound to one protocol variant
///
/// Exclusively owned by the worker performing the transfer and handed back
/// to [`ProtocolTransfer::disconnect`](super::ProtocolTransfer::disconnect)
/// on every exit path.
#[derive(Debug)]
pub struct TransferSession {
    id: Uuid,
    protocol: ProtocolKind,
    opened_at: DateTime<Utc>,
    directory: Option<String>,
    pub(crate) handle: SessionHandle,
}

impl TransferSession {
    pub fn new(protocol: ProtocolKind, handle: SessionHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            protocol,
            opened_at: Utc::now(),
            directory: None,
            handle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Remote directory most recently ensured on this session
    pub fn directory(&self) -> Option<&str> {
        self.directory.as_deref()
    }

    pub fn set_directory(&mut self, directory: impl Into<String>) {
        self.directory = Some(directory.into());
    }

    pub fn handle_mut(&mut self) -> &mut SessionHandle {
        &mut self.handle
    }

    pub fn into_handle(self) -> SessionHandle {
        self.handle
    }
}
