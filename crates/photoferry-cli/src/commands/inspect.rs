//! `photoferry inspect` command implementation
//!
//! Prints the integrity verdict of each file. Directories are expanded the
//! same way the startup scan does. Nothing is renamed or moved.

use anyhow::Context;
use photoferry_core::config::PipelineConfig;
use photoferry_core::ingest::{scan_directory, CandidateFilter};
use photoferry_core::inspect::{IntegrityInspector, IntegrityVerdict};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct InspectedFile {
    path: PathBuf,
    verdict: IntegrityVerdict,
    size: Option<u64>,
}

pub fn run(config: &PipelineConfig, paths: &[PathBuf], json: bool) -> anyhow::Result<()> {
    let inspector = IntegrityInspector::new(&config.integrity);
    let files = expand(config, paths)?;

    let results: Vec<InspectedFile> = files
        .into_iter()
        .map(|path| InspectedFile {
            verdict: inspector.inspect(&path),
            size: std::fs::metadata(&path).ok().map(|m| m.len()),
            path,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No files to inspect.");
        return Ok(());
    }

    for file in &results {
        let size = file.size.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        println!("{:<15} {:>12}  {}", file.verdict.as_str(), size, file.path.display());
    }

    let valid = results.iter().filter(|f| f.verdict == IntegrityVerdict::Valid).count();
    println!();
    println!("{valid} of {} file(s) valid", results.len());
    Ok(())
}

fn expand(config: &PipelineConfig, paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let filter = CandidateFilter::new(config.source.include_hidden);
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(list(path, config.source.recursive, &filter)?);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

pub(crate) fn list(dir: &Path, recursive: bool, filter: &CandidateFilter) -> anyhow::Result<Vec<PathBuf>> {
    scan_directory(dir, recursive, filter).with_context(|| format!("failed to list {}", dir.display()))
}
