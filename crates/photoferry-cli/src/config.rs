//! Configuration loading
//!
//! Layers, lowest priority first: built-in defaults, the TOML file, then
//! `PHOTOFERRY_`-prefixed environment variables with `__` separating
//! sections (`PHOTOFERRY_SERVER__HOST`, `PHOTOFERRY_RETRY__MAX_ATTEMPTS`).
//! Command-line overrides are applied last by [`Overrides::apply`].

use anyhow::Context;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use photoferry_core::config::PipelineConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_FILE: &str = "photoferry.toml";

pub const ENV_PREFIX: &str = "PHOTOFERRY_";

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source: Option<PathBuf>,
    pub workers: Option<usize>,
}

impl Overrides {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(ref source) = self.source {
            config.source.directory = source.clone();
        }
        if let Some(workers) = self.workers {
            config.workers.count = workers;
        }
    }
}

/// Load, override and validate the pipeline configuration
pub fn load(path: &Path, overrides: &Overrides) -> anyhow::Result<PipelineConfig> {
    let mut config = extract(path, Env::prefixed(ENV_PREFIX))?;
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;

    debug!(
        source = %config.source.directory.display(),
        host = %config.server.host,
        chain = ?config.effective_fallback_order(),
        workers = config.workers.count,
        "configuration loaded"
    );
    Ok(config)
}

fn extract(path: &Path, env: Env) -> anyhow::Result<PipelineConfig> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    if path.is_file() {
        figment = figment.merge(Toml::file(path));
    } else {
        warn!(path = %path.display(), "configuration file not found, using defaults");
    }

    figment
        .merge(env.split("__"))
        .extract()
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}
