use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use calcium_core::pipeline::{populate_all, PopulateConfig, ProgressReporter, StageName};

use crate::summary::print_populate_summary;

use super::open_context;

#[derive(Args)]
pub struct PopulateArgs {
    /// Stage to run; repeat to run several (default: the configured stages)
    #[arg(long = "stage")]
    pub stages: Vec<StageName>,

    /// Run keys one at a time
    #[arg(long)]
    pub serial: bool,
}

/// One progress bar per stage.
struct BarReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarReporter {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, stage: StageName, total_items: Option<usize>) {
        let bar = ProgressBar::new(total_items.unwrap_or(0) as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{msg:20} [{bar:40}] {pos}/{len}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(stage.to_string());
        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(bar);
        }
    }

    fn advance(&self, items_done: usize) {
        self.with_bar(|bar| bar.set_position(items_done as u64));
    }

    fn finish_stage(&self) {
        self.with_bar(ProgressBar::finish);
    }
}

pub fn run(args: &PopulateArgs, config_path: &Path) -> Result<()> {
    let (config, ctx) = open_context(config_path)?;

    let populate = PopulateConfig {
        parallel: config.populate.parallel && !args.serial,
        stages: if args.stages.is_empty() {
            config.populate.stages.clone()
        } else {
            args.stages.clone()
        },
    };

    let reporter = BarReporter::new();
    let summaries = populate_all(&ctx, &populate, &reporter)?;
    print_populate_summary(&summaries);

    let failed: usize = summaries.iter().map(|s| s.failed.len()).sum();
    anyhow::ensure!(failed == 0, "{failed} key(s) failed");
    Ok(())
}
