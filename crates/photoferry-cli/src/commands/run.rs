//! `photoferry run` command implementation
//!
//! Watches the source directory until Ctrl-C.

use crate::observer;
use anyhow::Context;
use photoferry_core::config::PipelineConfig;
use photoferry_core::ingest::IngestionCoordinator;
use photoferry_core::transfer::TransferEngine;
use tracing::info;

pub async fn run(config: PipelineConfig) -> anyhow::Result<()> {
    let engine = TransferEngine::from_config(&config).context("failed to build the transfer chain")?;
    let observer = observer::for_config(&config);
    let source = config.source.directory.clone();

    let handle = IngestionCoordinator::new(config, engine)
        .with_observer(observer)
        .start()
        .context("failed to start ingestion")?;

    info!(
        source = %source.display(),
        mode = %handle.watch_mode().map(|m| m.to_string()).unwrap_or_default(),
        "Watching for new files, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("Shutdown requested, finishing in-flight transfers");
    handle.shutdown();
    let summary = handle.join().await;

    println!("{summary}");
    Ok(())
}
