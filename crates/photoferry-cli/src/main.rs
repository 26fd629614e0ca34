//! Photoferry CLI - Main entry point

use clap::Parser;
use photoferry_cli::config::{self, Overrides};
use photoferry_cli::{commands, Cli, Commands};
use photoferry_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // .env is optional
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("photoferry")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI keeps working without logging
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        },
    };

    if let Err(e) = execute_command(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: Cli) -> anyhow::Result<()> {
    let overrides = Overrides {
        source: cli.source,
        workers: cli.workers,
    };
    let config = config::load(&cli.config, &overrides)?;

    match cli.command {
        Commands::Run => commands::run::run(config).await,
        Commands::Scan { json } => commands::scan::run(config, json).await,
        Commands::Inspect { paths, json } => commands::inspect::run(&config, &paths, json),
        Commands::Repair { dir, dry_run, force } => commands::repair::run(&config, dir, dry_run, force),
        Commands::TestConnection => commands::test_connection::run(&config).await,
    }
}
