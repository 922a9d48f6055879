use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Subcommand};

use calcium_core::keys::TaskKey;
use calcium_core::records::{ProcessingTask, TaskMode};

use super::{open_context, ScanArgs};

#[derive(Args)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Register a task with an explicit output directory
    Add(AddTaskArgs),
    /// Register a task at the conventional output directory
    Generate(GenerateTaskArgs),
}

#[derive(Args)]
pub struct AddTaskArgs {
    #[command(flatten)]
    pub scan: ScanArgs,

    #[arg(long)]
    pub paramset: u32,

    /// Output directory, relative to the data roots or absolute
    #[arg(long)]
    pub output_dir: PathBuf,

    /// load or trigger
    #[arg(long, default_value = "load")]
    pub mode: TaskMode,
}

#[derive(Args)]
pub struct GenerateTaskArgs {
    #[command(flatten)]
    pub scan: ScanArgs,

    #[arg(long)]
    pub paramset: u32,
}

pub fn run(args: &TaskArgs, config_path: &Path) -> Result<()> {
    let (_, ctx) = open_context(config_path)?;

    match &args.command {
        TaskCommand::Add(add) => {
            let task = ProcessingTask {
                key: TaskKey::new(add.scan.key(), add.paramset),
                output_dir: add.output_dir.clone(),
                mode: add.mode,
            };
            if ctx.catalog.insert_task(&task)? {
                println!("Added task {} ({})", task.key, task.mode);
            } else {
                println!("Task {} already exists", task.key);
            }
        }
        TaskCommand::Generate(generate) => {
            let task = ctx.generate_task(&generate.scan.key(), generate.paramset)?;
            println!(
                "Task {} ({}) -> {}",
                task.key,
                task.mode,
                task.output_dir.display()
            );
        }
    }

    Ok(())
}
