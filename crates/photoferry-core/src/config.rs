//! Pipeline configuration
//!
//! Everything the core consumes is described by [`PipelineConfig`]. Loading it
//! (files, environment) is the binary's job; this module only owns the shape,
//! the defaults and [`PipelineConfig::validate`].

use crate::transfer::{normalize_fingerprint, ProtocolKind, TransferStrategy};
use photoferry_common::{FerryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Source Defaults
// ============================================================================

/// Default source directory watched for new files.
pub const DEFAULT_SOURCE_DIRECTORY: &str = "./incoming";

/// Delay between the two size samples of the stability check.
pub const DEFAULT_STABILITY_DELAY_MS: u64 = 500;

/// Poll interval used when native filesystem notifications are unavailable.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

// ============================================================================
// Server Defaults
// ============================================================================

pub const DEFAULT_SERVER_HOST: &str = "localhost";
pub const DEFAULT_FTP_PORT: u16 = 21;
pub const DEFAULT_IMPLICIT_TLS_PORT: u16 = 990;
pub const DEFAULT_SFTP_PORT: u16 = 22;
pub const DEFAULT_REMOTE_DIRECTORY: &str = "/";

/// Control connection timeout, independent of the per-strategy timeouts.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;

// ============================================================================
// Retry Defaults
// ============================================================================

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay between retries (multiplied by the attempt number for linear backoff).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5_000;

pub const DEFAULT_BACKOFF_CAP_MS: u64 = 60_000;

// ============================================================================
// Integrity / Worker Defaults
// ============================================================================

pub const DEFAULT_EXTENSION: &str = "jpg";
pub const DEFAULT_QUARANTINE_DIRECTORY: &str = "./quarantine";
pub const DEFAULT_BACKUP_DIRECTORY: &str = "./backup";
pub const DEFAULT_WORKER_COUNT: usize = 1;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Terminal records kept for reporting.
pub const DEFAULT_REPORT_HISTORY: usize = 256;

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub server: ServerConfig,
    pub strategies: Vec<TransferStrategy>,
    pub retry: RetryConfig,
    pub integrity: IntegrityConfig,
    pub local_backup: LocalBackupConfig,
    pub workers: WorkerConfig,
    pub after_transfer: AfterTransferConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            server: ServerConfig::default(),
            strategies: TransferStrategy::default_ladder(),
            retry: RetryConfig::default(),
            integrity: IntegrityConfig::default(),
            local_backup: LocalBackupConfig::default(),
            workers: WorkerConfig::default(),
            after_transfer: AfterTransferConfig::default(),
        }
    }
}

/// Where candidate files appear
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub directory: PathBuf,
    pub stability_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub recursive: bool,
    pub include_hidden: bool,
    /// Skip native notifications entirely (network shares, FUSE mounts)
    pub force_polling: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_SOURCE_DIRECTORY),
            stability_delay_ms: DEFAULT_STABILITY_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            recursive: false,
            include_hidden: false,
            force_polling: false,
        }
    }
}

impl SourceConfig {
    pub fn stability_delay(&self) -> Duration {
        Duration::from_millis(self.stability_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Login pair, optionally overridden per protocol
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Remote endpoint settings shared by every network protocol variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,

    /// Port for plain FTP and explicit FTPS; 21 when unset
    pub port: Option<u16>,

    pub username: String,
    pub password: String,
    pub remote_directory: String,
    pub passive_mode: bool,
    pub protocol_fallback_order: Vec<ProtocolKind>,
    pub implicit_tls_port: u16,
    pub sftp_port: u16,
    pub connect_timeout_ms: u64,

    /// Accept self-signed or mismatched certificates (typical for NAS boxes)
    pub accept_invalid_certs: bool,

    /// Let explicit FTPS switch its data channel to `PROT C` when the server
    /// breaks protected transfers. Login stays on the TLS control channel;
    /// there is no downgrade to plain FTP.
    pub allow_clear_data_fallback: bool,

    /// Compare the remote size with the local size after each upload
    pub verify_remote_size: bool,

    /// Expected SFTP host key, hex SHA-256 (colons allowed). Unset accepts any
    /// key and logs its fingerprint.
    pub sftp_host_key: Option<String>,

    /// Per-protocol overrides keyed by protocol name, e.g. `sftp`
    pub credentials: BTreeMap<String, Credentials>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: None,
            username: "anonymous".to_string(),
            password: String::new(),
            remote_directory: DEFAULT_REMOTE_DIRECTORY.to_string(),
            passive_mode: true,
            protocol_fallback_order: vec![ProtocolKind::ExplicitFtps, ProtocolKind::PlainFtp],
            implicit_tls_port: DEFAULT_IMPLICIT_TLS_PORT,
            sftp_port: DEFAULT_SFTP_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            accept_invalid_certs: true,
            allow_clear_data_fallback: true,
            verify_remote_size: true,
            sftp_host_key: None,
            credentials: BTreeMap::new(),
        }
    }
}

/// Delay curve between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffKind::Linear,
            base_delay_ms: DEFAULT_BACKOFF_BASE_MS,
            max_delay_ms: DEFAULT_BACKOFF_CAP_MS,
        }
    }
}

/// Casing applied to the canonical extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionCase {
    #[default]
    Lower,
    Upper,
    /// Keep whatever casing a file already has; appended extensions use
    /// `default_extension` verbatim
    Preserve,
}

/// What to do with files whose content could not be classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPolicy {
    /// Leave the file in place and look again on the next notification
    #[default]
    Retry,
    Quarantine,
    /// Upload it anyway
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantinePolicy {
    #[default]
    Move,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    pub default_extension: String,
    pub extension_case: ExtensionCase,
    pub force_default_extension: bool,
    pub unknown_policy: UnknownPolicy,
    pub quarantine_dir: PathBuf,
    pub quarantine_policy: QuarantinePolicy,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            default_extension: DEFAULT_EXTENSION.to_string(),
            extension_case: ExtensionCase::Lower,
            force_default_extension: false,
            unknown_policy: UnknownPolicy::Retry,
            quarantine_dir: PathBuf::from(DEFAULT_QUARANTINE_DIRECTORY),
            quarantine_policy: QuarantinePolicy::Move,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalBackupConfig {
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for LocalBackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from(DEFAULT_BACKUP_DIRECTORY),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub queue_capacity: usize,
    pub drain_on_shutdown: bool,
    pub report_history: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_on_shutdown: true,
            report_history: DEFAULT_REPORT_HISTORY,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AfterTransferConfig {
    pub delete_source: bool,
}

impl PipelineConfig {
    /// Protocol chain actually used by the engine
    ///
    /// An enabled local backup is appended as the terminal fallback when the
    /// configured order does not already name it.
    pub fn effective_fallback_order(&self) -> Vec<ProtocolKind> {
        let mut order = self.server.protocol_fallback_order.clone();
        if self.local_backup.enabled && !order.contains(&ProtocolKind::LocalBackup) {
            order.push(ProtocolKind::LocalBackup);
        }
        order
    }

    /// Port to dial for a protocol variant
    pub fn server_port_for(&self, kind: ProtocolKind) -> u16 {
        match kind {
            ProtocolKind::PlainFtp | ProtocolKind::ExplicitFtps => {
                self.server.port.unwrap_or(DEFAULT_FTP_PORT)
            },
            ProtocolKind::ImplicitFtps => self.server.implicit_tls_port,
            ProtocolKind::Sftp => self.server.sftp_port,
            ProtocolKind::LocalBackup => 0,
        }
    }

    /// Credentials for a protocol variant, honouring per-protocol overrides
    pub fn credentials_for(&self, kind: ProtocolKind) -> Credentials {
        self.server
            .credentials
            .get(kind.as_str())
            .cloned()
            .unwrap_or_else(|| Credentials {
                username: self.server.username.clone(),
                password: self.server.password.clone(),
            })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.server.connect_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let order = &self.server.protocol_fallback_order;
        if order.is_empty() && !self.local_backup.enabled {
            return Err(FerryError::validation("protocol_fallback_order cannot be empty"));
        }

        let needs_server = order.iter().any(|kind| kind.is_remote());
        if needs_server && self.server.host.trim().is_empty() {
            return Err(FerryError::validation("server.host cannot be empty"));
        }

        if order.contains(&ProtocolKind::LocalBackup) && !self.local_backup.enabled {
            return Err(FerryError::validation(
                "local_backup is in the fallback order but local_backup.enabled is false",
            ));
        }

        for key in self.server.credentials.keys() {
            if key.parse::<ProtocolKind>().is_err() {
                return Err(FerryError::validation(format!(
                    "unknown protocol '{key}' in server.credentials"
                )));
            }
        }

        if let Some(ref key) = self.server.sftp_host_key {
            let fingerprint = normalize_fingerprint(key);
            if fingerprint.len() != 64 || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(FerryError::validation(format!(
                    "server.sftp_host_key '{key}' must be a hex SHA-256 fingerprint"
                )));
            }
        }

        if self.strategies.is_empty() {
            return Err(FerryError::validation("at least one transfer strategy is required"));
        }

        for strategy in &self.strategies {
            if strategy.buffer_size == 0 || strategy.timeout_ms == 0 {
                return Err(FerryError::validation(format!(
                    "strategy '{}' needs a non-zero buffer_size and timeout_ms",
                    strategy.name
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(FerryError::validation("retry.max_attempts must be greater than 0"));
        }

        if self.workers.count == 0 {
            return Err(FerryError::validation("workers.count must be greater than 0"));
        }

        if self.workers.queue_capacity == 0 {
            return Err(FerryError::validation("workers.queue_capacity must be greater than 0"));
        }

        let extension = self.integrity.default_extension.trim();
        if extension.is_empty() || extension.contains('.') || extension.contains('/') {
            return Err(FerryError::validation(format!(
                "integrity.default_extension '{}' must be a bare extension like 'jpg'",
                self.integrity.default_extension
            )));
        }

        if self.integrity.quarantine_policy == QuarantinePolicy::Move
            && self.integrity.quarantine_dir == self.source.directory
        {
            return Err(FerryError::validation(
                "integrity.quarantine_dir must differ from source.directory",
            ));
        }

        if self.local_backup.enabled && self.local_backup.directory == self.source.directory {
            return Err(FerryError::validation(
                "local_backup.directory must differ from source.directory",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.effective_fallback_order(),
            vec![ProtocolKind::ExplicitFtps, ProtocolKind::PlainFtp]
        );
        assert_eq!(config.strategies.len(), 3);
    }

    #[test]
    fn test_ports_per_protocol() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.server_port_for(ProtocolKind::PlainFtp), 21);
        assert_eq!(config.server_port_for(ProtocolKind::ImplicitFtps), 990);
        assert_eq!(config.server_port_for(ProtocolKind::Sftp), 22);

        config.server.port = Some(2121);
        assert_eq!(config.server_port_for(ProtocolKind::ExplicitFtps), 2121);
        assert_eq!(config.server_port_for(ProtocolKind::Sftp), 22);
    }

    #[test]
    fn test_credentials_override() {
        let mut config = PipelineConfig::default();
        config.server.username = "camera".into();
        config.server.password = "secret".into();
        config.server.credentials.insert(
            "sftp".into(),
            Credentials {
                username: "nas".into(),
                password: "other".into(),
            },
        );

        assert_eq!(config.credentials_for(ProtocolKind::PlainFtp).username, "camera");
        assert_eq!(config.credentials_for(ProtocolKind::Sftp).username, "nas");
        assert!(config.validate().is_ok());

        config.server.credentials.insert("gopher".into(), Credentials::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_backup_appended_when_enabled() {
        let mut config = PipelineConfig::default();
        config.local_backup.enabled = true;
        assert_eq!(
            config.effective_fallback_order().last(),
            Some(&ProtocolKind::LocalBackup)
        );

        config.local_backup.enabled = false;
        config.server.protocol_fallback_order.push(ProtocolKind::LocalBackup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.workers.count = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.server.host = "  ".into();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.integrity.default_extension = ".jpg".into();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.integrity.quarantine_dir = config.source.directory.clone();
        assert!(config.validate().is_err());
        config.integrity.quarantine_policy = QuarantinePolicy::Delete;
        assert!(config.validate().is_ok());

        let mut config = PipelineConfig::default();
        config.strategies = vec![TransferStrategy::new("broken", 0, Duration::from_secs(1))];
        assert!(config.validate().is_err());
        config.strategies.clear();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.server.sftp_host_key = Some("not-a-fingerprint".into());
        assert!(config.validate().is_err());
        config.server.sftp_host_key = Some("AB:".repeat(31) + "AB");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "server": { "host": "nas.local", "protocol_fallback_order": ["sftp", "plain_ftp"] },
                "integrity": { "extension_case": "upper", "unknown_policy": "quarantine" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.server.host, "nas.local");
        assert_eq!(
            config.server.protocol_fallback_order,
            vec![ProtocolKind::Sftp, ProtocolKind::PlainFtp]
        );
        assert_eq!(config.integrity.extension_case, ExtensionCase::Upper);
        assert_eq!(config.integrity.unknown_policy, UnknownPolicy::Quarantine);
        assert_eq!(config.source.stability_delay_ms, DEFAULT_STABILITY_DELAY_MS);
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }
}
