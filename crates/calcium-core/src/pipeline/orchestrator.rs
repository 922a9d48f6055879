use tracing::{info, warn};

use crate::error::Result;

use super::config::PopulateConfig;
use super::context::PipelineContext;
use super::stage::populate;
use super::stages::{
    ActivityStage, FluorescenceStage, MotionCorrectionStage, ProcessingStage, SegmentationStage,
};
use super::types::{PopulateSummary, ProgressReporter, StageName};

/// Populate a single stage.
pub fn populate_stage(
    ctx: &PipelineContext,
    stage: StageName,
    parallel: bool,
    reporter: &dyn ProgressReporter,
) -> Result<PopulateSummary> {
    let summary = match stage {
        StageName::Processing => populate(&ProcessingStage, ctx, parallel, reporter)?,
        StageName::MotionCorrection => populate(&MotionCorrectionStage, ctx, parallel, reporter)?,
        StageName::Segmentation => populate(&SegmentationStage, ctx, parallel, reporter)?,
        StageName::Fluorescence => populate(&FluorescenceStage, ctx, parallel, reporter)?,
        StageName::Activity => populate(&ActivityStage, ctx, parallel, reporter)?,
    };

    if summary.is_clean() {
        info!(
            stage = %stage,
            eligible = summary.eligible,
            inserted = summary.inserted,
            skipped = summary.skipped,
            "Stage populated"
        );
    } else {
        warn!(
            stage = %stage,
            inserted = summary.inserted,
            failed = summary.failed.len(),
            "Stage populated with failures"
        );
    }
    Ok(summary)
}

/// Populate the configured stages in dependency order. Key failures are
/// reported in the summaries; only store-level errors abort the run.
pub fn populate_all(
    ctx: &PipelineContext,
    config: &PopulateConfig,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<PopulateSummary>> {
    let mut stages = config.stages.clone();
    stages.sort();
    stages.dedup();

    let mut summaries = Vec::with_capacity(stages.len());
    for stage in stages {
        summaries.push(populate_stage(ctx, stage, config.parallel, reporter)?);
    }
    Ok(summaries)
}
