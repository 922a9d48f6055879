//! EXTRACT output: suite2p registration plus an archive of spatial and
//! temporal weights for the extracted cells.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3, Axis};
use tracing::debug;

use crate::consts::{EXTRACT_OUTPUT_FILE, EXTRACT_REGISTRATION_DIR, EXTRACT_REQUIRED_MEMBERS};
use crate::error::{ImagingError, Result};
use crate::io::archive::ResultArchive;
use crate::loader::suite2p::Suite2pResult;
use crate::loader::{
    member_dim, modified_time, require_dir, ChannelTraces, LoadedMask, LoadedResult, Memo,
    MotionShifts, PlaneActivity, PlaneMasks, PlaneTraces, ResultLoader, SummarySource,
};
use crate::params::{ExtractionMethod, ProcessingMethod};

pub struct ExtractResult {
    output_dir: PathBuf,
    registration: Suite2pResult,
    archive: ResultArchive,
    creation_time: DateTime<Utc>,
    masks: Memo<Vec<LoadedMask>>,
    /// Temporal weights transposed to `(masks, frames)`.
    traces: Memo<Array2<f32>>,
}

impl ExtractResult {
    pub fn open(output_dir: &Path) -> Result<Self> {
        let dir = require_dir(ProcessingMethod::Extract, output_dir, EXTRACT_OUTPUT_FILE)?;

        let archive_path = dir.join(EXTRACT_OUTPUT_FILE);
        if !archive_path.exists() {
            return Err(ImagingError::missing(
                "extract",
                &dir,
                vec![EXTRACT_OUTPUT_FILE.to_string()],
            ));
        }
        let archive = ResultArchive::open(&archive_path)?;
        let missing = archive.missing(&EXTRACT_REQUIRED_MEMBERS);
        if !missing.is_empty() {
            return Err(ImagingError::missing("extract", &archive_path, missing));
        }

        let registration_dir = dir.join(EXTRACT_REGISTRATION_DIR);
        let registration = if registration_dir.is_dir() {
            Suite2pResult::open_registration(&registration_dir)?
        } else {
            Suite2pResult::open_registration(&dir)?
        };

        debug!(dir = %dir.display(), "Opened EXTRACT output");
        Ok(Self {
            creation_time: modified_time(&archive_path)?,
            output_dir: dir,
            registration,
            archive,
            masks: Memo::new(),
            traces: Memo::new(),
        })
    }

    pub fn registration(&self) -> &Suite2pResult {
        &self.registration
    }

    pub fn traces_load_count(&self) -> usize {
        self.traces.load_count()
    }

    /// `(height, width, masks)`.
    fn spatial_weights(&self) -> Result<Array3<f32>> {
        let array = self.archive.read::<f32>("spatial_weights")?;
        member_dim(&self.archive, "spatial_weights", array)
    }

    /// `(frames, masks)`.
    fn temporal_weights(&self) -> Result<Array2<f32>> {
        let array = self.archive.read::<f32>("temporal_weights")?;
        member_dim(&self.archive, "temporal_weights", array)
    }

    fn extract_masks(&self) -> Result<Vec<LoadedMask>> {
        let weights = self.spatial_weights()?;
        let masks: Vec<LoadedMask> = weights
            .axis_iter(Axis(2))
            .map(|footprint| {
                let mut mask = LoadedMask::default();
                for ((y, x), &w) in footprint.indexed_iter() {
                    if w != 0.0 {
                        mask.ypix.push(y as i64);
                        mask.xpix.push(x as i64);
                        mask.weights.push(w);
                    }
                }
                mask.pixel_count = mask.weights.len();
                let total: f64 = mask.weights.iter().map(|w| f64::from(*w)).sum();
                if total != 0.0 {
                    let center = |pix: &[i64]| {
                        let sum: f64 = pix
                            .iter()
                            .zip(&mask.weights)
                            .map(|(p, w)| *p as f64 * f64::from(*w))
                            .sum();
                        (sum / total + 0.5) as i64
                    };
                    mask.center_x = center(&mask.xpix);
                    mask.center_y = center(&mask.ypix);
                }
                mask
            })
            .collect();
        debug!(masks = masks.len(), "Extracted EXTRACT footprints");
        Ok(masks)
    }
}

impl LoadedResult for ExtractResult {
    fn method(&self) -> ProcessingMethod {
        ProcessingMethod::Extract
    }

    fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time.min(self.registration.creation_time())
    }

    fn curation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    fn alignment_channel(&self) -> Result<u32> {
        self.registration.first_alignment_channel()
    }

    fn segmentation_channel(&self) -> Result<u32> {
        Ok(0)
    }

    fn plane_indices(&self) -> Vec<usize> {
        vec![0]
    }

    fn motion(&self) -> Result<MotionShifts> {
        self.registration.motion_shifts()
    }

    fn summary_images(&self) -> Result<SummarySource> {
        self.registration.summary()
    }

    fn masks(&self) -> Result<Vec<PlaneMasks>> {
        let masks = self.masks.get_or_try_load(|| self.extract_masks())?;
        Ok(vec![PlaneMasks {
            plane: 0,
            masks: masks.clone(),
        }])
    }

    fn fluorescence(&self) -> Result<Vec<PlaneTraces>> {
        let traces = self.traces.get_or_try_load(|| {
            let temporal = self.temporal_weights()?;
            let traces = temporal.reversed_axes().as_standard_layout().into_owned();
            Ok(traces)
        })?;
        Ok(vec![PlaneTraces {
            plane: 0,
            channels: vec![ChannelTraces {
                channel: 0,
                follows_segmentation: true,
                fluorescence: traces.clone(),
                neuropil: None,
            }],
        }])
    }

    fn activity(&self, method: ExtractionMethod) -> Result<Vec<PlaneActivity>> {
        Err(ImagingError::InvalidConfig(format!(
            "extract output has no {method} activity"
        )))
    }
}

pub struct ExtractLoader;

impl ResultLoader for ExtractLoader {
    fn method(&self) -> ProcessingMethod {
        ProcessingMethod::Extract
    }

    fn open(&self, output_dir: &Path) -> Result<Box<dyn LoadedResult>> {
        Ok(Box::new(ExtractResult::open(output_dir)?))
    }
}
