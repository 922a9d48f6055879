use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;

use calcium_core::keys::TaskKey;

use super::{open_context, ScanArgs};

#[derive(Args)]
pub struct CurateArgs {
    #[command(flatten)]
    pub scan: ScanArgs,

    #[arg(long)]
    pub paramset: u32,

    /// Revised output directory; defaults to the task's own output
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Mark the curation as manually edited
    #[arg(long)]
    pub manual: bool,

    #[arg(long, default_value = "")]
    pub note: String,
}

pub fn run(args: &CurateArgs, config_path: &Path) -> Result<()> {
    let (_, ctx) = open_context(config_path)?;
    let task = TaskKey::new(args.scan.key(), args.paramset);
    let key = ctx.create_curation(&task, args.output_dir.clone(), args.manual, &args.note)?;
    println!("Created curation {key}");
    Ok(())
}
