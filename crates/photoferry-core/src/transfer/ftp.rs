//! FTP family variants: plain FTP, explicit FTPS and implicit FTPS
//!
//! All three share one blocking `suppaftp` stream type; they differ only in
//! whether and when TLS is negotiated on the control channel.
//!
//! Some NAS servers advertise `AUTH TLS` but then refuse protected data
//! connections ("TLS session of data connection not resumed") or accept them
//! and store zero bytes. When an upload fails that way an explicit FTPS
//! variant with `allow_clear_data_fallback` reconnects, still authenticating
//! over TLS, switches the data channel to `PROT C` and remembers the decision
//! for every later session. Credentials never leave the host unencrypted on
//! an FTPS variant.

use super::{
    copy_with_buffer, remote_components, ChannelSecurity, ProtocolKind, ProtocolTransfer,
    SessionHandle, TransferError, TransferSession, TransferStrategy,
};
use crate::config::{Credentials, PipelineConfig};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpError, Mode, NativeTlsConnector, NativeTlsFtpStream, Status};
use tracing::{debug, info, warn};

/// Where and how to reach an FTP server
#[derive(Debug, Clone)]
pub struct FtpEndpoint {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub passive_mode: bool,
    pub connect_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub allow_clear_data_fallback: bool,
    pub verify_remote_size: bool,
}

impl FtpEndpoint {
    pub fn from_config(config: &PipelineConfig, kind: ProtocolKind) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server_port_for(kind),
            credentials: config.credentials_for(kind),
            passive_mode: config.server.passive_mode,
            connect_timeout: config.connect_timeout(),
            accept_invalid_certs: config.server.accept_invalid_certs,
            allow_clear_data_fallback: config.server.allow_clear_data_fallback,
            verify_remote_size: config.server.verify_remote_size,
        }
    }

    fn resolve(&self) -> Result<SocketAddr, TransferError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| TransferError::from_network_io(&e))?
            .next()
            .ok_or_else(|| {
                TransferError::ServiceUnavailable(format!("no address found for {}", self.host))
            })
    }
}

/// Step an FTP reply belongs to; the same code means different things per step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FtpStage {
    Connect,
    Login,
    Directory,
    Upload,
}

/// Map an FTP reply code onto the transfer taxonomy
pub(crate) fn classify_reply(code: u32, message: &str, stage: FtpStage) -> TransferError {
    let lower = message.to_lowercase();
    if lower.contains("not resumed") || lower.contains("session reuse") {
        return TransferError::SessionNotResumed(message.to_string());
    }

    let message = message.to_string();
    match code {
        421 => TransferError::ServiceUnavailable(message),
        425 | 426 => TransferError::ConnectionReset(message),
        331 | 332 | 430 | 530 | 532 => TransferError::Auth(message),
        431 | 522 | 533..=536 => TransferError::Negotiation(message),
        452 | 552 => TransferError::StorageFull(message),
        550 if stage == FtpStage::Directory => TransferError::Directory(message),
        550 => TransferError::PermissionDenied(message),
        553 => TransferError::Rejected(message),
        // AUTH TLS not understood
        500..=504 if stage == FtpStage::Connect => TransferError::Negotiation(message),
        400..=499 => TransferError::ServiceUnavailable(message),
        _ => TransferError::Rejected(message),
    }
}

fn classify(error: FtpError, stage: FtpStage) -> TransferError {
    let message = error.to_string();
    match error {
        FtpError::ConnectionError(ref io) => TransferError::from_network_io(io),
        FtpError::SecureError(_) => TransferError::Negotiation(message),
        FtpError::UnexpectedResponse(ref response) => {
            classify_reply(response.status.code(), &message, stage)
        },
        _ => TransferError::Negotiation(message),
    }
}

fn ftp_stream(session: &mut TransferSession) -> Result<&mut NativeTlsFtpStream, TransferError> {
    match &mut session.handle {
        SessionHandle::Ftp { stream, .. } => Ok(stream),
        other => Err(TransferError::LocalIo(format!(
            "session handle {other:?} does not belong to an FTP variant"
        ))),
    }
}

/// Data address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply
pub(crate) fn parse_passive_reply(reply: &str) -> Option<SocketAddr> {
    let start = reply.find('(')?;
    let end = start + reply[start..].find(')')?;
    let fields = reply[start + 1..end]
        .split(',')
        .map(|field| field.trim().parse::<u8>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    let [a, b, c, d, high, low] = fields[..] else {
        return None;
    };
    let port = (u16::from(high) << 8) | u16::from(low);
    Some(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), port)))
}

/// Bounded TCP connect; suppaftp's implicit TLS constructor has no timeout
fn check_reachable(addr: SocketAddr, timeout: Duration) -> Result<(), TransferError> {
    TcpStream::connect_timeout(&addr, timeout)
        .map(drop)
        .map_err(|e| TransferError::from_network_io(&e))
}

/// Open a passive data connection without TLS and start `STOR` on it
fn open_clear_data(
    stream: &mut NativeTlsFtpStream,
    remote_name: &str,
    strategy: &TransferStrategy,
) -> Result<TcpStream, TransferError> {
    let reply = stream
        .custom_command("PASV", &[Status::PassiveMode])
        .map_err(|e| classify(e, FtpStage::Upload))?;
    let text = String::from_utf8_lossy(&reply.body);
    let addr = parse_passive_reply(&text).ok_or_else(|| {
        TransferError::Negotiation(format!("unparseable PASV reply: {}", text.trim_end()))
    })?;

    let data = TcpStream::connect_timeout(&addr, strategy.timeout())
        .map_err(|e| TransferError::from_network_io(&e))?;
    data.set_write_timeout(Some(strategy.timeout()))
        .map_err(|e| TransferError::from_network_io(&e))?;

    stream
        .custom_command(
            format!("STOR {remote_name}"),
            &[Status::AlreadyOpen, Status::AboutToSend],
        )
        .map_err(|e| classify(e, FtpStage::Upload))?;
    Ok(data)
}

/// Copy the file into an opened data connection and collect the final reply
fn send_data<R: Read, W: Write>(
    stream: &mut NativeTlsFtpStream,
    reader: &mut R,
    mut data: W,
    buffer_size: usize,
) -> Result<u64, TransferError> {
    let sent = match copy_with_buffer(reader, &mut data, buffer_size) {
        Ok(sent) => sent,
        Err(copy_error) => {
            // The server's reply usually says more than the broken socket
            return Err(match stream.finalize_put_stream(data) {
                Err(reply) => classify(reply, FtpStage::Upload),
                Ok(()) => TransferError::from_network_io(&copy_error),
            });
        },
    };

    stream
        .finalize_put_stream(data)
        .map_err(|e| classify(e, FtpStage::Upload))?;
    Ok(sent)
}

fn security_of(session: &TransferSession) -> ChannelSecurity {
    match &session.handle {
        SessionHandle::Ftp { security, .. } => *security,
        _ => ChannelSecurity::Clear,
    }
}

/// One FTP family variant
pub struct FtpTransfer {
    kind: ProtocolKind,
    endpoint: FtpEndpoint,
    clear_data_latched: AtomicBool,
}

impl FtpTransfer {
    /// `kind` must be one of the FTP variants
    pub fn new(kind: ProtocolKind, endpoint: FtpEndpoint) -> Self {
        debug_assert!(matches!(
            kind,
            ProtocolKind::PlainFtp | ProtocolKind::ExplicitFtps | ProtocolKind::ImplicitFtps
        ));
        Self {
            kind,
            endpoint,
            clear_data_latched: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &FtpEndpoint {
        &self.endpoint
    }

    /// Whether this variant has already given up on protected data channels
    pub fn clear_data_latched(&self) -> bool {
        self.clear_data_latched.load(Ordering::Relaxed)
    }

    fn initial_security(&self) -> ChannelSecurity {
        match self.kind {
            ProtocolKind::ImplicitFtps => ChannelSecurity::Tls,
            ProtocolKind::ExplicitFtps if self.clear_data_latched() => ChannelSecurity::ClearData,
            ProtocolKind::ExplicitFtps => ChannelSecurity::Tls,
            _ => ChannelSecurity::Clear,
        }
    }

    /// Only a failed upload on a fully protected session qualifies; connect
    /// and handshake failures never do. The clear data channel is opened with
    /// `PASV`, so active mode sessions stay protected.
    fn may_fall_back(&self, security: ChannelSecurity, error: &TransferError) -> bool {
        self.kind == ProtocolKind::ExplicitFtps
            && security == ChannelSecurity::Tls
            && self.endpoint.allow_clear_data_fallback
            && self.endpoint.passive_mode
            && error.suggests_clear_data()
    }

    fn latch_clear_data(&self, error: &TransferError) {
        if !self.clear_data_latched.swap(true, Ordering::Relaxed) {
            warn!(
                host = %self.endpoint.host,
                error = %error,
                "Protected data channel failed, using clear data channel for this server from now on"
            );
        }
    }

    fn tls_connector(&self) -> Result<NativeTlsConnector, TransferError> {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(self.endpoint.accept_invalid_certs)
            .danger_accept_invalid_hostnames(self.endpoint.accept_invalid_certs)
            .build()
            .map_err(|e| TransferError::Negotiation(format!("TLS setup failed: {e}")))?;
        Ok(NativeTlsConnector::from(connector))
    }

    fn open(
        &self,
        security: ChannelSecurity,
        strategy: &TransferStrategy,
    ) -> Result<TransferSession, TransferError> {
        let addr = self.endpoint.resolve()?;
        let host = self.endpoint.host.as_str();
        debug!(protocol = %self.kind, %addr, ?security, strategy = %strategy.name, "Connecting to FTP server");

        let mut stream = if self.kind == ProtocolKind::ImplicitFtps {
            check_reachable(addr, self.endpoint.connect_timeout)?;
            NativeTlsFtpStream::connect_secure_implicit(addr, self.tls_connector()?, host)
                .map_err(|e| classify(e, FtpStage::Connect))?
        } else {
            NativeTlsFtpStream::connect_timeout(addr, self.endpoint.connect_timeout)
                .map_err(|e| classify(e, FtpStage::Connect))?
        };

        let timeout = Some(strategy.timeout());
        stream
            .get_ref()
            .set_read_timeout(timeout)
            .and_then(|_| stream.get_ref().set_write_timeout(timeout))
            .map_err(|e| TransferError::from_network_io(&e))?;

        if self.kind == ProtocolKind::ExplicitFtps && security != ChannelSecurity::Clear {
            // AUTH TLS, PBSZ 0, PROT P
            stream = stream
                .into_secure(self.tls_connector()?, host)
                .map_err(|e| classify(e, FtpStage::Connect))?;
        }
        if security == ChannelSecurity::ClearData {
            stream
                .custom_command("PROT C", &[Status::CommandOk])
                .map_err(|e| classify(e, FtpStage::Connect))?;
        }

        stream.set_mode(if self.endpoint.passive_mode {
            Mode::Passive
        } else {
            Mode::Active
        });

        let credentials = &self.endpoint.credentials;
        stream
            .login(&credentials.username, &credentials.password)
            .map_err(|e| classify(e, FtpStage::Login))?;

        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| classify(e, FtpStage::Login))?;

        info!(protocol = %self.kind, host, ?security, "FTP session established");
        Ok(TransferSession::new(
            self.kind,
            SessionHandle::Ftp { stream, security },
        ))
    }

    fn store(
        &self,
        session: &mut TransferSession,
        local_path: &Path,
        remote_name: &str,
        strategy: &TransferStrategy,
    ) -> Result<u64, TransferError> {
        let file = File::open(local_path).map_err(|e| TransferError::from_local_io(&e))?;
        let mut reader = BufReader::with_capacity(strategy.buffer_size.max(1), file);
        let security = security_of(session);
        let stream = ftp_stream(session)?;

        let sent = if security == ChannelSecurity::ClearData {
            let data = open_clear_data(stream, remote_name, strategy)?;
            send_data(stream, &mut reader, data, strategy.buffer_size)?
        } else {
            let data = stream
                .put_with_stream(remote_name)
                .map_err(|e| classify(e, FtpStage::Upload))?;
            if let Err(e) = data.get_ref().set_write_timeout(Some(strategy.timeout())) {
                debug!("Could not set data channel timeout: {}", e);
            }
            send_data(stream, &mut reader, data, strategy.buffer_size)?
        };

        if self.endpoint.verify_remote_size {
            match stream.size(remote_name) {
                Ok(remote) if remote as u64 != sent => {
                    return Err(TransferError::SessionNotResumed(format!(
                        "server stored {remote} of {sent} bytes for {remote_name}"
                    )));
                },
                Ok(_) => {},
                Err(e) => debug!("SIZE not available, skipping verification: {}", e),
            }
        }

        Ok(sent)
    }
}

impl ProtocolTransfer for FtpTransfer {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    fn connect(&self, strategy: &TransferStrategy) -> Result<TransferSession, TransferError> {
        self.open(self.initial_security(), strategy)
    }

    fn ensure_directory(
        &self,
        session: &mut TransferSession,
        remote_dir: &str,
    ) -> Result<(), TransferError> {
        {
            let stream = ftp_stream(session)?;
            if !remote_dir.trim().is_empty() {
                if let Err(e) = stream.cwd(remote_dir) {
                    let error = classify(e, FtpStage::Directory);
                    if !matches!(error, TransferError::Directory(_)) {
                        return Err(error);
                    }

                    debug!(remote_dir, "Remote directory missing, creating it");
                    if remote_dir.starts_with('/') {
                        stream.cwd("/").map_err(|e| classify(e, FtpStage::Directory))?;
                    }
                    for part in remote_components(remote_dir) {
                        if stream.cwd(part).is_ok() {
                            continue;
                        }
                        if let Err(e) = stream.mkdir(part) {
                            // Lost a race with another client creating it
                            debug!(part, "MKD failed: {}", e);
                        }
                        stream.cwd(part).map_err(|e| classify(e, FtpStage::Directory))?;
                    }
                    info!(remote_dir, "Created remote directory");
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
        let security = security_of(session);
        match self.store(session, local_path, remote_name, strategy) {
            Err(e) if self.may_fall_back(security, &e) => {
                self.latch_clear_data(&e);
                let directory = session.directory().map(str::to_string);

                let placeholder = TransferSession::new(self.kind, SessionHandle::Opaque(Box::new(())));
                self.disconnect(std::mem::replace(session, placeholder));

                *session = self.open(ChannelSecurity::ClearData, strategy)?;
                if let Some(directory) = directory {
                    self.ensure_directory(session, &directory)?;
                }
                self.store(session, local_path, remote_name, strategy)
            },
            result => result,
        }
    }

    fn disconnect(&self, session: TransferSession) {
        if let SessionHandle::Ftp { mut stream, .. } = session.into_handle() {
            if let Err(e) = stream.quit() {
                warn!("Failed to quit FTP session: {}", e);
            }
        }
    }
}
