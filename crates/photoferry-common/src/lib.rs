//! Photoferry Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and checksum helpers for the photoferry
//! workspace members.
//!
//! - **Error Handling**: [`FerryError`] and the [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//! - **Checksums**: SHA-256 helpers used to verify local copies
//!
//! # Example
//!
//! ```no_run
//! use photoferry_common::checksum::sha256_file;
//! use photoferry_common::Result;
//!
//! fn fingerprint(path: &str) -> Result<()> {
//!     let digest = sha256_file(path)?;
//!     tracing::info!(%digest, "fingerprinted");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{FerryError, Result};
