pub mod config;
pub mod curate;
pub mod export;
pub mod params;
pub mod populate;
pub mod status;
pub mod task;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use calcium_core::keys::{CurationKey, ScanKey, TaskKey};
use calcium_core::pipeline::{PipelineConfig, PipelineContext};
use calcium_core::scan::ScanCatalog;
use calcium_core::store::{open_store, Catalog};

/// Identifies one scan on the command line.
#[derive(Args, Clone)]
pub struct ScanArgs {
    #[arg(long)]
    pub subject: String,

    #[arg(long)]
    pub session: String,

    #[arg(long = "scan")]
    pub scan_id: u32,
}

impl ScanArgs {
    pub fn key(&self) -> ScanKey {
        ScanKey::new(self.subject.clone(), self.session.clone(), self.scan_id)
    }
}

/// Identifies one curation on the command line.
#[derive(Args, Clone)]
pub struct CurationArgs {
    #[command(flatten)]
    pub scan: ScanArgs,

    /// Parameter set id of the task
    #[arg(long)]
    pub paramset: u32,

    #[arg(long, default_value = "0")]
    pub curation: u32,
}

impl CurationArgs {
    pub fn key(&self) -> CurationKey {
        CurationKey::new(TaskKey::new(self.scan.key(), self.paramset), self.curation)
    }
}

pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    PipelineConfig::from_toml_str(&contents)
        .with_context(|| format!("Invalid pipeline config {}", path.display()))
}

/// Store, scan catalog and data roots described by the config file.
pub fn open_context(config_path: &Path) -> Result<(PipelineConfig, PipelineContext)> {
    let config = load_config(config_path)?;

    let store = open_store(&config.store).context("Failed to open result store")?;
    let scans = match &config.scans {
        Some(path) => ScanCatalog::load(path)
            .with_context(|| format!("Failed to load scan catalog {}", path.display()))?,
        None => ScanCatalog::new(),
    };
    debug!(store = store.name(), scans = scans.len(), "Opened pipeline context");

    let ctx = PipelineContext::new(Catalog::new(store), Arc::new(scans), config.paths.clone());
    Ok((config, ctx))
}
