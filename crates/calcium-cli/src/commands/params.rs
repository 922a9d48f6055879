use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;

use calcium_core::params::{ParameterSet, ProcessingMethod};

use crate::summary::print_parameter_sets;

use super::open_context;

#[derive(Args)]
pub struct ParamsArgs {
    #[command(subcommand)]
    pub command: ParamsCommand,
}

#[derive(Subcommand)]
pub enum ParamsCommand {
    /// Register a parameter set from a JSON file
    Add(AddParamsArgs),
    /// List registered parameter sets
    List,
}

#[derive(Args)]
pub struct AddParamsArgs {
    /// Processing method (suite2p, caiman, extract)
    #[arg(long)]
    pub method: ProcessingMethod,

    #[arg(long)]
    pub id: u32,

    /// JSON object with the tool parameters
    pub file: PathBuf,

    #[arg(short, long, default_value = "")]
    pub description: String,

    /// Version of the analysis package these parameters target
    #[arg(long)]
    pub package_version: Option<String>,
}

pub fn run(args: &ParamsArgs, config_path: &Path) -> Result<()> {
    let (_, ctx) = open_context(config_path)?;

    match &args.command {
        ParamsCommand::Add(add) => {
            let contents = std::fs::read_to_string(&add.file)
                .with_context(|| format!("Failed to read parameters {}", add.file.display()))?;
            let params: Value = serde_json::from_str(&contents)
                .with_context(|| format!("Invalid JSON in {}", add.file.display()))?;
            anyhow::ensure!(params.is_object(), "Parameters must be a JSON object");

            let mut set = ParameterSet::new(add.method, add.id, add.description.clone(), &params);
            if let Some(ref version) = add.package_version {
                set = set.with_package_version(version.clone());
            }
            let hash = set.content_hash.clone();
            if ctx.catalog.insert_parameter_set(set)? {
                println!("Registered {} parameter set {} ({hash})", add.method, add.id);
            } else {
                println!("Parameter set {} already registered", add.id);
            }
        }
        ParamsCommand::List => {
            print_parameter_sets(&ctx.catalog.parameter_sets()?);
        }
    }

    Ok(())
}
