//! The five stages of the pipeline, from task ingestion to activity traces.

use std::collections::HashSet;

use tracing::info;

use crate::error::{ImagingError, Result};
use crate::keys::{ActivityKey, CurationKey, TaskKey};
use crate::normalize::{
    normalize_activity, normalize_fluorescence, normalize_motion, normalize_segmentation,
    resolve_segmentation_channel,
};
use crate::params::ProcessingMethod;
use crate::records::{
    ActivityRecord, FluorescenceRecord, MotionCorrectionRecord, ProcessingResult,
    SegmentationRecord, TaskMode,
};
use crate::store::Table;

use super::context::PipelineContext;
use super::stage::Stage;
use super::types::StageName;

fn upstream_missing(stage: StageName, key: impl std::fmt::Display) -> ImagingError {
    ImagingError::UpstreamNotReady {
        stage: stage.to_string(),
        key: key.to_string(),
    }
}

/// Accepts a task's existing output and records when it was produced.
pub struct ProcessingStage;

impl Stage for ProcessingStage {
    type Key = TaskKey;
    type Record = ProcessingResult;

    fn name(&self) -> StageName {
        StageName::Processing
    }

    fn key_source(&self, ctx: &PipelineContext) -> Result<Vec<TaskKey>> {
        Ok(ctx
            .catalog
            .keys::<TaskKey>(Table::Tasks)?
            .into_iter()
            .filter(|key| ctx.scans.scan_metadata(&key.scan).is_some())
            .collect())
    }

    fn make(&self, ctx: &PipelineContext, key: &TaskKey) -> Result<ProcessingResult> {
        let task = ctx.catalog.task(key)?;
        let params = ctx.catalog.parameter_set(key.paramset_id)?;
        let metadata = ctx.scan_metadata(&key.scan)?;

        if task.mode == TaskMode::Trigger {
            return Err(ImagingError::TriggerUnsupported(params.method.to_string()));
        }
        if params.method == ProcessingMethod::Suite2p && metadata.nrois > 0 {
            return Err(ImagingError::MultiRoiUnsupported(key.to_string()));
        }

        let inferred = task.output_dir.as_os_str().is_empty();
        let output_dir = if inferred {
            let dir = ctx
                .roots
                .infer_output_dir(&metadata.scan_dir, params.method, key.paramset_id)?;
            ctx.roots.relative_to_processed(&dir)
        } else {
            task.output_dir
        };

        let dir = ctx.roots.find_full_path(&output_dir)?;
        let result = ctx.loaders.open_method(&dir, params.method)?;
        if inferred {
            ctx.catalog.update_task_output_dir(key, &output_dir)?;
        }
        info!(key = %key, planes = result.plane_indices().len(), "Loaded processing output");

        Ok(ProcessingResult {
            key: key.clone(),
            completed_at: result.creation_time(),
            package_version: params.package_version,
        })
    }
}

pub struct MotionCorrectionStage;

impl Stage for MotionCorrectionStage {
    type Key = CurationKey;
    type Record = MotionCorrectionRecord;

    fn name(&self) -> StageName {
        StageName::MotionCorrection
    }

    fn key_source(&self, ctx: &PipelineContext) -> Result<Vec<CurationKey>> {
        ctx.catalog.keys(Table::Curations)
    }

    fn make(&self, ctx: &PipelineContext, key: &CurationKey) -> Result<MotionCorrectionRecord> {
        let metadata = ctx.scan_metadata(&key.task.scan)?;
        let (result, _) = ctx.open_curation_result(key)?;
        normalize_motion(key, result.as_ref(), &metadata)
    }
}

pub struct SegmentationStage;

impl Stage for SegmentationStage {
    type Key = CurationKey;
    type Record = SegmentationRecord;

    fn name(&self) -> StageName {
        StageName::Segmentation
    }

    fn key_source(&self, ctx: &PipelineContext) -> Result<Vec<CurationKey>> {
        let corrected: HashSet<CurationKey> = ctx
            .catalog
            .keys::<CurationKey>(Table::MotionCorrection)?
            .into_iter()
            .collect();
        Ok(ctx
            .catalog
            .keys::<CurationKey>(Table::Curations)?
            .into_iter()
            .filter(|key| corrected.contains(key))
            .collect())
    }

    fn make(&self, ctx: &PipelineContext, key: &CurationKey) -> Result<SegmentationRecord> {
        let (result, params) = ctx.open_curation_result(key)?;
        let channel = resolve_segmentation_channel(&params, result.as_ref())?;
        let planes = result.masks()?;
        normalize_segmentation(key, &planes, channel, params.method.classifier())
    }
}

pub struct FluorescenceStage;

impl Stage for FluorescenceStage {
    type Key = CurationKey;
    type Record = FluorescenceRecord;

    fn name(&self) -> StageName {
        StageName::Fluorescence
    }

    fn key_source(&self, ctx: &PipelineContext) -> Result<Vec<CurationKey>> {
        ctx.catalog.keys(Table::Segmentation)
    }

    fn make(&self, ctx: &PipelineContext, key: &CurationKey) -> Result<FluorescenceRecord> {
        let segmentation = ctx
            .catalog
            .segmentation(key)?
            .ok_or_else(|| upstream_missing(self.name(), key))?;
        let (result, params) = ctx.open_curation_result(key)?;
        let channel = resolve_segmentation_channel(&params, result.as_ref())?;
        normalize_fluorescence(key, &segmentation, result.fluorescence()?, channel)
    }
}

pub struct ActivityStage;

impl Stage for ActivityStage {
    type Key = ActivityKey;
    type Record = ActivityRecord;

    fn name(&self) -> StageName {
        StageName::Activity
    }

    /// Fluorescence keys crossed with the extraction methods of each
    /// curation's processing method.
    fn key_source(&self, ctx: &PipelineContext) -> Result<Vec<ActivityKey>> {
        let mut keys = Vec::new();
        for curation in ctx.catalog.keys::<CurationKey>(Table::Fluorescence)? {
            let params = ctx.catalog.parameter_set(curation.task.paramset_id)?;
            for &method in params.method.extraction_methods() {
                keys.push(ActivityKey {
                    curation: curation.clone(),
                    method,
                });
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn make(&self, ctx: &PipelineContext, key: &ActivityKey) -> Result<ActivityRecord> {
        let segmentation = ctx
            .catalog
            .segmentation(&key.curation)?
            .ok_or_else(|| upstream_missing(self.name(), key))?;
        let (result, params) = ctx.open_curation_result(&key.curation)?;
        if !params.method.extraction_methods().contains(&key.method) {
            return Err(ImagingError::InvalidConfig(format!(
                "{} output has no {} activity",
                params.method, key.method
            )));
        }
        let channel = resolve_segmentation_channel(&params, result.as_ref())?;
        normalize_activity(key, &segmentation, result.activity(key.method)?, channel)
    }
}
