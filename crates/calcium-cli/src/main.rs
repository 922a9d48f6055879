mod commands;
mod summary;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "calcium", about = "Calcium-imaging result normalization pipeline")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pipeline config file (TOML)
    #[arg(short, long, global = true, default_value = "calcium.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print or save a default pipeline config
    Config(commands::config::ConfigArgs),
    /// Register and list parameter sets
    Params(commands::params::ParamsArgs),
    /// Register processing tasks
    Task(commands::task::TaskArgs),
    /// Create a curation of a processed task
    Curate(commands::curate::CurateArgs),
    /// Run pipeline stages for every pending key
    Populate(commands::populate::PopulateArgs),
    /// Show row counts of every table
    Status,
    /// Write normalized traces, shifts or summary images to disk
    Export(commands::export::ExportArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Config(args) => commands::config::run(args),
        Commands::Params(args) => commands::params::run(args, &cli.config),
        Commands::Task(args) => commands::task::run(args, &cli.config),
        Commands::Curate(args) => commands::curate::run(args, &cli.config),
        Commands::Populate(args) => commands::populate::run(args, &cli.config),
        Commands::Status => commands::status::run(&cli.config),
        Commands::Export(args) => commands::export::run(args, &cli.config),
    }
}
