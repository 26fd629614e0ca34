//! Protocol transfer engine
//!
//! Every way of getting a file off this machine implements
//! [`ProtocolTransfer`]: plain FTP, explicit FTPS, implicit FTPS, SFTP and a
//! local backup directory. The [`TransferEngine`] walks the configured chain
//! of variants, trying each variant's strategies in order, and records a
//! [`TransferAttempt`] for every strategy it tries.
//!
//! Variant calls are blocking; the engine runs them on the blocking thread
//! pool.

mod engine;
mod error;
mod ftp;
mod local;
mod session;
mod sftp;
mod strategy;

pub use engine::{
    AttemptOutcome, AttemptStage, ChainExhausted, Delivery, ProbeResult, ProtocolSummary,
    TransferAttempt, TransferEngine, TransferReport,
};
pub use error::{ErrorCategory, TransferError};
pub use ftp::{FtpEndpoint, FtpTransfer};
pub use local::LocalBackupSink;
pub use session::{ChannelSecurity, SessionHandle, TransferSession};
pub(crate) use sftp::normalize_fingerprint;
pub use sftp::{SftpEndpoint, SftpTransfer};
pub use strategy::TransferStrategy;

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::path::Path;

/// Closed set of transfer variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    PlainFtp,
    ExplicitFtps,
    ImplicitFtps,
    Sftp,
    LocalBackup,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 5] = [
        ProtocolKind::PlainFtp,
        ProtocolKind::ExplicitFtps,
        ProtocolKind::ImplicitFtps,
        ProtocolKind::Sftp,
        ProtocolKind::LocalBackup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolKind::PlainFtp => "plain_ftp",
            ProtocolKind::ExplicitFtps => "explicit_ftps",
            ProtocolKind::ImplicitFtps => "implicit_ftps",
            ProtocolKind::Sftp => "sftp",
            ProtocolKind::LocalBackup => "local_backup",
        }
    }

    /// Needs a server connection
    pub fn is_remote(self) -> bool {
        !matches!(self, ProtocolKind::LocalBackup)
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ProtocolKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .or(match normalized.as_str() {
                "ftp" => Some(ProtocolKind::PlainFtp),
                "ftps" => Some(ProtocolKind::ExplicitFtps),
                "local" => Some(ProtocolKind::LocalBackup),
                _ => None,
            })
            .ok_or_else(|| format!("unknown protocol: {s}"))
    }
}

/// Capability shared by all transfer variants
///
/// Implementations are synchronous and must bound every network operation
/// with the strategy's timeout. `disconnect` is best effort and never fails.
pub trait ProtocolTransfer: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    /// Open the control connection and authenticate
    fn connect(&self, strategy: &TransferStrategy) -> Result<TransferSession, TransferError>;

    /// Enter `remote_dir`, creating missing components
    fn ensure_directory(
        &self,
        session: &mut TransferSession,
        remote_dir: &str,
    ) -> Result<(), TransferError>;

    /// Store `local_path` as `remote_name` inside the ensured directory,
    /// returning the number of bytes sent
    fn upload(
        &self,
        session: &mut TransferSession,
        local_path: &Path,
        remote_name: &str,
        strategy: &TransferStrategy,
    ) -> Result<u64, TransferError>;

    fn disconnect(&self, session: TransferSession);
}

/// Copy `reader` into `writer` through a buffer of exactly `buffer_size` bytes
pub(crate) fn copy_with_buffer<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
) -> io::Result<u64> {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }

    writer.flush()?;
    Ok(total)
}

/// `/`-separated components of a remote directory
pub(crate) fn remote_components(remote_dir: &str) -> Vec<&str> {
    remote_dir
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect()
}

/// Join a remote directory and file name with exactly one `/`
pub(crate) fn remote_join(remote_dir: &str, name: &str) -> String {
    let dir = remote_dir.trim_end_matches('/');
    if dir.is_empty() {
        if remote_dir.starts_with('/') {
            format!("/{name}")
        } else {
            name.to_string()
        }
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_protocol_kind_parsing() {
        assert_eq!("explicit_ftps".parse::<ProtocolKind>().unwrap(), ProtocolKind::ExplicitFtps);
        assert_eq!("plain-ftp".parse::<ProtocolKind>().unwrap(), ProtocolKind::PlainFtp);
        assert_eq!("SFTP".parse::<ProtocolKind>().unwrap(), ProtocolKind::Sftp);
        assert_eq!("ftp".parse::<ProtocolKind>().unwrap(), ProtocolKind::PlainFtp);
        assert!("gopher".parse::<ProtocolKind>().is_err());

        for kind in ProtocolKind::ALL {
            assert_eq!(kind.to_string().parse::<ProtocolKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_copy_with_small_buffer() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut out = Vec::new();
        let copied = copy_with_buffer(&mut Cursor::new(&data), &mut out, 1024).unwrap();
        assert_eq!(copied, 10_000);
        assert_eq!(out, data);
    }

    #[test]
    fn test_remote_paths() {
        assert_eq!(remote_components("/photos//2024/./raw/"), vec!["photos", "2024", "raw"]);
        assert_eq!(remote_join("/photos/", "a.jpg"), "/photos/a.jpg");
        assert_eq!(remote_join("/", "a.jpg"), "/a.jpg");
        assert_eq!(remote_join("", "a.jpg"), "a.jpg");
        assert_eq!(remote_join("upload", "a.jpg"), "upload/a.jpg");
    }
}
