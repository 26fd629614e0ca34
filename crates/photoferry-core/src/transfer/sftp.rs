//! SFTP variant on top of libssh2

use super::{
    copy_with_buffer, remote_components, remote_join, ProtocolKind, ProtocolTransfer,
    SessionHandle, TransferError, TransferSession, TransferStrategy,
};
use crate::config::{Credentials, PipelineConfig};
use ssh2::{ErrorCode, HashType, Session, Sftp};
use std::fs::File;
use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

// libssh2 session error codes
const LIBSSH2_ERROR_BANNER_RECV: i32 = -2;
const LIBSSH2_ERROR_KEX_FAILURE: i32 = -5;
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_PASSWORD_EXPIRED: i32 = -15;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_SOCKET_TIMEOUT: i32 = -30;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

// SFTP status codes
const LIBSSH2_FX_NO_SUCH_FILE: i32 = 2;
const LIBSSH2_FX_PERMISSION_DENIED: i32 = 3;
const LIBSSH2_FX_NO_SUCH_PATH: i32 = 10;
const LIBSSH2_FX_NO_SPACE_ON_FILESYSTEM: i32 = 14;
const LIBSSH2_FX_QUOTA_EXCEEDED: i32 = 15;

#[derive(Debug, Clone)]
pub struct SftpEndpoint {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub connect_timeout: Duration,
    pub verify_remote_size: bool,
    /// Hex SHA-256 of the expected host key
    pub host_key: Option<String>,
}

impl SftpEndpoint {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server_port_for(ProtocolKind::Sftp),
            credentials: config.credentials_for(ProtocolKind::Sftp),
            connect_timeout: config.connect_timeout(),
            verify_remote_size: config.server.verify_remote_size,
            host_key: config.server.sftp_host_key.clone(),
        }
    }
}

/// Map a libssh2 error code onto the transfer taxonomy
pub(crate) fn classify_code(code: ErrorCode, message: &str, in_directory: bool) -> TransferError {
    let message = message.to_string();
    match code {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT | LIBSSH2_ERROR_SOCKET_TIMEOUT) => {
            TransferError::Timeout(message)
        },
        ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED | LIBSSH2_ERROR_PASSWORD_EXPIRED) => {
            TransferError::Auth(message)
        },
        ErrorCode::Session(LIBSSH2_ERROR_KEX_FAILURE | LIBSSH2_ERROR_BANNER_RECV) => {
            TransferError::Negotiation(message)
        },
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND | LIBSSH2_ERROR_SOCKET_RECV | LIBSSH2_ERROR_SOCKET_DISCONNECT,
        ) => TransferError::ConnectionReset(message),
        ErrorCode::Session(_) => TransferError::ConnectionReset(message),
        ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE | LIBSSH2_FX_NO_SUCH_PATH) if in_directory => {
            TransferError::Directory(message)
        },
        ErrorCode::SFTP(LIBSSH2_FX_PERMISSION_DENIED) => TransferError::PermissionDenied(message),
        ErrorCode::SFTP(LIBSSH2_FX_NO_SPACE_ON_FILESYSTEM | LIBSSH2_FX_QUOTA_EXCEEDED) => {
            TransferError::StorageFull(message)
        },
        ErrorCode::SFTP(_) => TransferError::Rejected(message),
    }
}

fn classify(error: ssh2::Error, in_directory: bool) -> TransferError {
    classify_code(error.code(), &error.to_string(), in_directory)
}

/// Lowercase hex without separators, so `AB:CD` and `abcd` compare equal
pub(crate) fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Reject the server unless its key matches `expected`, when one is configured
fn check_host_key(host: &str, expected: Option<&str>, actual: &str) -> Result<(), TransferError> {
    match expected {
        Some(expected) if normalize_fingerprint(expected) != actual => {
            Err(TransferError::Auth(format!(
                "host key of {host} is {actual}, expected {}",
                normalize_fingerprint(expected)
            )))
        },
        Some(_) => Ok(()),
        None => {
            info!(host, fingerprint = actual, "SFTP host key not pinned, set server.sftp_host_key to verify it");
            Ok(())
        },
    }
}

fn sftp_of(session: &mut TransferSession) -> Result<&mut Sftp, TransferError> {
    match &mut session.handle {
        SessionHandle::Sftp { sftp, .. } => Ok(sftp),
        other => Err(TransferError::LocalIo(format!(
            "session handle {other:?} does not belong to SFTP"
        ))),
    }
}

/// File subsystem over an SSH session, password authentication
pub struct SftpTransfer {
    endpoint: SftpEndpoint,
}

impl SftpTransfer {
    pub fn new(endpoint: SftpEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &SftpEndpoint {
        &self.endpoint
    }
}

impl ProtocolTransfer for SftpTransfer {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Sftp
    }

    fn connect(&self, strategy: &TransferStrategy) -> Result<TransferSession, TransferError> {
        let addr = (self.endpoint.host.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(|e| TransferError::from_network_io(&e))?
            .next()
            .ok_or_else(|| {
                TransferError::ServiceUnavailable(format!(
                    "no address found for {}",
                    self.endpoint.host
                ))
            })?;
        debug!(%addr, strategy = %strategy.name, "Connecting to SFTP server");

        let tcp = TcpStream::connect_timeout(&addr, self.endpoint.connect_timeout)
            .map_err(|e| TransferError::from_network_io(&e))?;
        let timeout = Some(strategy.timeout());
        tcp.set_read_timeout(timeout)
            .and_then(|_| tcp.set_write_timeout(timeout))
            .map_err(|e| TransferError::from_network_io(&e))?;

        let mut session = Session::new().map_err(|e| classify(e, false))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(strategy.timeout_ms.min(u32::MAX as u64) as u32);
        session.handshake().map_err(|e| classify(e, false))?;

        let fingerprint = session
            .host_key_hash(HashType::Sha256)
            .map(hex::encode)
            .ok_or_else(|| TransferError::Negotiation("server presented no host key".into()))?;
        check_host_key(&self.endpoint.host, self.endpoint.host_key.as_deref(), &fingerprint)?;

        let credentials = &self.endpoint.credentials;
        session
            .userauth_password(&credentials.username, &credentials.password)
            .map_err(|e| classify(e, false))?;
        if !session.authenticated() {
            return Err(TransferError::Auth(format!(
                "server did not accept credentials for {}",
                credentials.username
            )));
        }

        let sftp = session.sftp().map_err(|e| classify(e, false))?;
        info!(host = %self.endpoint.host, "SFTP session established");
        Ok(TransferSession::new(
            ProtocolKind::Sftp,
            SessionHandle::Sftp { session, sftp },
        ))
    }

    fn ensure_directory(
        &self,
        session: &mut TransferSession,
        remote_dir: &str,
    ) -> Result<(), TransferError> {
        {
            let sftp = sftp_of(session)?;
            let absolute = remote_dir.starts_with('/');
            let mut current = String::new();

            for part in remote_components(remote_dir) {
                current = if current.is_empty() && !absolute {
                    part.to_string()
                } else {
                    format!("{current}/{part}")
                };
                let path = Path::new(&current);

                match sftp.stat(path) {
                    Ok(stat) if stat.is_dir() => continue,
                    Ok(_) => {
                        return Err(TransferError::Directory(format!(
                            "{current} exists and is not a directory"
                        )));
                    },
                    Err(e) => {
                        let error = classify(e, true);
                        if !matches!(error, TransferError::Directory(_)) {
                            return Err(error);
                        }
                    },
                }

                debug!(path = %current, "Creating remote directory");
                if let Err(e) = sftp.mkdir(path, 0o755) {
                    // Lost a race with another client creating it
                    if !sftp.stat(path).map(|s| s.is_dir()).unwrap_or(false) {
                        return Err(classify(e, true));
                    }
                }
            }
        }

        session.set_directory(remote_dir);
        Ok(())
    }

    fn upload(
        &self,
        session: &mut TransferSession,
        local_path: &Path,
        remote_name: &str,
        strategy: &TransferStrategy,
    ) -> Result<u64, TransferError> {
        let remote_path = remote_join(session.directory().unwrap_or_default(), remote_name);
        let file = File::open(local_path).map_err(|e| TransferError::from_local_io(&e))?;
        let mut reader = BufReader::with_capacity(strategy.buffer_size.max(1), file);

        let sftp = sftp_of(session)?;
        let mut remote = sftp
            .create(Path::new(&remote_path))
            .map_err(|e| classify(e, false))?;
        let sent = copy_with_buffer(&mut reader, &mut remote, strategy.buffer_size)
            .map_err(|e| TransferError::from_network_io(&e))?;
        drop(remote);

        if self.endpoint.verify_remote_size {
            let stored = sftp
                .stat(Path::new(&remote_path))
                .map_err(|e| classify(e, false))?
                .size
                .unwrap_or(sent);
            if stored != sent {
                return Err(TransferError::ConnectionReset(format!(
                    "server stored {stored} of {sent} bytes for {remote_path}"
                )));
            }
        }

        Ok(sent)
    }

    fn disconnect(&self, session: TransferSession) {
        if let SessionHandle::Sftp { session, sftp } = session.into_handle() {
            drop(sftp);
            if let Err(e) = session.disconnect(None, "photoferry done", None) {
                warn!("Failed to close SFTP session: {}", e);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const NAS_KEY: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn test_host_key_pinning() {
        assert!(check_host_key("nas.local", None, NAS_KEY).is_ok());
        assert!(check_host_key("nas.local", Some(NAS_KEY), NAS_KEY).is_ok());

        let colons = NAS_KEY
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).to_uppercase())
            .collect::<Vec<_>>()
            .join(":");
        assert!(check_host_key("nas.local", Some(&colons), NAS_KEY).is_ok());

        let other = NAS_KEY.replace('9', "8");
        let mismatch = check_host_key("nas.local", Some(&other), NAS_KEY).unwrap_err();
        // Auth skips the remaining strategies for this protocol
        assert!(matches!(mismatch, TransferError::Auth(_)));
    }

    #[test]
    fn test_endpoint_carries_pinned_key() {
        let mut config = PipelineConfig::default();
        assert!(SftpEndpoint::from_config(&config).host_key.is_none());
        config.server.sftp_host_key = Some(NAS_KEY.to_string());
        assert_eq!(SftpEndpoint::from_config(&config).host_key.as_deref(), Some(NAS_KEY));
    }

    #[test]
    fn test_session_codes() {
        let auth = classify_code(ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED), "auth", false);
        assert!(matches!(auth, TransferError::Auth(_)));

        let timeout = classify_code(ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT), "timeout", false);
        assert!(matches!(timeout, TransferError::Timeout(_)));

        let kex = classify_code(ErrorCode::Session(LIBSSH2_ERROR_KEX_FAILURE), "kex", false);
        assert!(matches!(kex, TransferError::Negotiation(_)));

        let reset = classify_code(ErrorCode::Session(LIBSSH2_ERROR_SOCKET_RECV), "recv", false);
        assert!(matches!(reset, TransferError::ConnectionReset(_)));
    }

    #[test]
    fn test_sftp_status_codes() {
        let missing = classify_code(ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE), "missing", true);
        assert!(matches!(missing, TransferError::Directory(_)));

        let missing_file = classify_code(ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE), "missing", false);
        assert!(matches!(missing_file, TransferError::Rejected(_)));

        let denied = classify_code(ErrorCode::SFTP(LIBSSH2_FX_PERMISSION_DENIED), "denied", true);
        assert!(matches!(denied, TransferError::PermissionDenied(_)));

        let full = classify_code(ErrorCode::SFTP(LIBSSH2_FX_QUOTA_EXCEEDED), "quota", false);
        assert!(matches!(full, TransferError::StorageFull(_)));
    }

    #[test]
    fn test_endpoint_uses_sftp_port_and_credentials() {
        let mut config = PipelineConfig::default();
        config.server.port = Some(2121);
        config.server.credentials.insert(
            "sftp".into(),
            Credentials {
                username: "backup".into(),
                password: "pw".into(),
            },
        );
        let endpoint = SftpEndpoint::from_config(&config);
        assert_eq!(endpoint.port, 22);
        assert_eq!(endpoint.credentials.username, "backup");
    }
}
