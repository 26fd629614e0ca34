//! Photoferry CLI Library
//!
//! Command-line front end for the photoferry pipeline.
//!
//! # Overview
//!
//! - **Watching**: ingest and transfer files as the camera writes them (`photoferry run`)
//! - **One-shot scans**: process what is already in the source directory and exit (`photoferry scan`)
//! - **Inspection**: print integrity verdicts without touching anything (`photoferry inspect`)
//! - **Extension repair**: batch rename extensionless or oddly cased files (`photoferry repair`)
//! - **Connectivity**: try every configured protocol once (`photoferry test-connection`)

pub mod commands;
pub mod config;
pub mod observer;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Photoferry - move camera files to a NAS over FTP, FTPS or SFTP
#[derive(Parser, Debug)]
#[command(name = "photoferry")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (TOML); missing files fall back to defaults
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    /// Source directory, overriding the configuration
    #[arg(long, global = true)]
    pub source: Option<PathBuf>,

    /// Number of transfer workers, overriding the configuration
    #[arg(long, global = true)]
    pub workers: Option<usize>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the source directory and transfer files until interrupted
    Run,

    /// Process the files already in the source directory, then exit
    Scan {
        /// Print the records as JSON instead of one line per file
        #[arg(long)]
        json: bool,
    },

    /// Print the integrity verdict of files or directories
    Inspect {
        /// Files or directories to inspect
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Repair missing or mis-cased extensions in a directory
    Repair {
        /// Directory to repair (defaults to the configured source directory)
        dir: Option<PathBuf>,

        /// Show what would be renamed without renaming
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Append the default extension even when the content is not a valid JPEG
        #[arg(short, long)]
        force: bool,
    },

    /// Connect to every configured protocol and report which ones work
    TestConnection,
}
