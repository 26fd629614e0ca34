//! `photoferry repair` command implementation
//!
//! Batch extension repair: appends the default extension to extensionless
//! JPEGs and normalises the case of existing ones.

use super::inspect::list;
use photoferry_core::config::PipelineConfig;
use photoferry_core::ingest::CandidateFilter;
use photoferry_core::inspect::IntegrityInspector;
use std::path::PathBuf;
use tracing::warn;

pub fn run(config: &PipelineConfig, dir: Option<PathBuf>, dry_run: bool, force: bool) -> anyhow::Result<()> {
    let dir = dir.unwrap_or_else(|| config.source.directory.clone());
    let inspector = IntegrityInspector::new(&config.integrity);
    let force = force || config.integrity.force_default_extension;
    let filter = CandidateFilter::new(config.source.include_hidden);

    let mut renamed = 0usize;
    let mut failed = 0usize;

    for path in list(&dir, config.source.recursive, &filter)? {
        let verdict = inspector.inspect(&path);
        let Some(target) = inspector.plan_repair(&path, verdict, force) else {
            continue;
        };

        if dry_run {
            println!("would rename {} -> {}", path.display(), target.display());
            renamed += 1;
            continue;
        }

        match inspector.repair_extension(&path, verdict, force) {
            Ok(new_path) => {
                println!("renamed {} -> {}", path.display(), new_path.display());
                renamed += 1;
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Extension repair failed");
                eprintln!("failed {}: {e}", path.display());
                failed += 1;
            },
        }
    }

    let verb = if dry_run { "to rename" } else { "renamed" };
    println!("{renamed} file(s) {verb} in {}", dir.display());

    if failed > 0 {
        anyhow::bail!("{failed} file(s) could not be renamed");
    }
    Ok(())
}
