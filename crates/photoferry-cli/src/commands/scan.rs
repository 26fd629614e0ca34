//! `photoferry scan` command implementation
//!
//! Processes the files already in the source directory, drains the queue and
//! exits. Fails when any file ended `Failed`.

use crate::observer;
use anyhow::Context;
use photoferry_core::config::PipelineConfig;
use photoferry_core::ingest::{IngestionCoordinator, IngestionRecord, RunSummary};
use photoferry_core::transfer::TransferEngine;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ScanReport {
    summary: RunSummary,
    records: Vec<IngestionRecord>,
}

pub async fn run(config: PipelineConfig, json: bool) -> anyhow::Result<()> {
    let engine = TransferEngine::from_config(&config).context("failed to build the transfer chain")?;
    let observer = observer::for_config(&config);

    let coordinator = IngestionCoordinator::new(config, engine).with_observer(observer);
    let registry = coordinator.registry();
    let summary = coordinator.scan_once().await.context("scan failed")?;
    let records = registry.records();

    if json {
        let report = ScanReport { summary, records };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for record in &records {
            println!("{}", record.describe());
        }
        println!("{summary}");
    }

    if summary.failed > 0 {
        anyhow::bail!("{} file(s) could not be transferred", summary.failed);
    }
    Ok(())
}
