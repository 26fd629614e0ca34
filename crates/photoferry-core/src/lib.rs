//! Photoferry core
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! The ingestion-and-transfer pipeline behind the `photoferry` binary:
//!
//! - [`inspect`] decides whether a freshly written file is a complete JPEG and
//!   repairs trivial extension defects
//! - [`transfer`] uploads files over plain FTP, FTPS, SFTP or into a local
//!   backup directory, falling back across strategies and protocols
//! - [`retry`] is the bounded retry wrapper shared by the stages above
//! - [`ingest`] watches the source directory, deduplicates notifications,
//!   waits for write stability and feeds the transfer workers
//!
//! # Example
//!
//! ```no_run
//! use photoferry_core::config::PipelineConfig;
//! use photoferry_core::ingest::IngestionCoordinator;
//! use photoferry_core::transfer::TransferEngine;
//!
//! # async fn run() -> photoferry_common::Result<()> {
//! let config = PipelineConfig::default();
//! config.validate()?;
//!
//! let engine = TransferEngine::from_config(&config)?;
//! let handle = IngestionCoordinator::new(config, engine).start()?;
//!
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown();
//! let summary = handle.join().await;
//! tracing::info!(%summary, "stopped");
//! # Ok(())
//! # }
//! ```

pub mod config;
mod fs;
pub mod ingest;
pub mod inspect;
pub mod retry;
pub mod transfer;

pub use config::PipelineConfig;
pub use ingest::{IngestionCoordinator, IngestionHandle, IngestionObserver};
pub use inspect::{IntegrityInspector, IntegrityVerdict};
pub use transfer::{ProtocolKind, TransferEngine, TransferError};
