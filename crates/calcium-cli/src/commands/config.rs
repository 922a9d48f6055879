use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use calcium_core::paths::DataRoots;
use calcium_core::pipeline::{PipelineConfig, PopulateConfig};
use calcium_core::store::StoreConfig;

#[derive(Args)]
pub struct ConfigArgs {
    /// Destination file; prints to stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Emit a starter config with every section filled in.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = PipelineConfig {
        scans: Some(PathBuf::from("scans.toml")),
        paths: DataRoots::new("data"),
        store: StoreConfig::default(),
        populate: PopulateConfig::default(),
    };
    let text = config.to_toml_string()?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote starter config to {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}
