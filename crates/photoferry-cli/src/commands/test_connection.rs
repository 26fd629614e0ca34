//! `photoferry test-connection` command implementation
//!
//! Connects to every protocol in the fallback chain and makes sure the
//! remote directory exists. Succeeds when at least one protocol works.

use anyhow::Context;
use photoferry_core::config::PipelineConfig;
use photoferry_core::transfer::TransferEngine;

pub async fn run(config: &PipelineConfig) -> anyhow::Result<()> {
    let engine = TransferEngine::from_config(config).context("failed to build the transfer chain")?;

    println!("Testing {} ({})", config.server.host, config.server.remote_directory);
    let results = engine.probe().await;

    for result in &results {
        match result.error {
            None => println!("  {:<14} ok      {:>6} ms", result.protocol.as_str(), result.elapsed_ms),
            Some(ref error) => println!("  {:<14} FAILED  {error}", result.protocol.as_str()),
        }
    }

    let working = results.iter().filter(|r| r.ok()).count();
    if working == 0 {
        anyhow::bail!("none of the configured protocols could connect");
    }
    println!("{working} of {} protocol(s) reachable", results.len());
    Ok(())
}
