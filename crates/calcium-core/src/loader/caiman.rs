//! CaImAn output: one archive holding named groups for the whole run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Ix1};
use tracing::debug;

use crate::consts::CAIMAN_REQUIRED_MEMBERS;
use crate::error::{ImagingError, Result};
use crate::io::archive::ResultArchive;
use crate::loader::{
    member_dim, modified_time, require_dir, ChannelTraces, LoadedMask, LoadedResult, Memo,
    MotionShifts, PlaneActivity, PlaneMasks, PlaneTraces, ResultLoader, SummarySource,
    VolumeBlocks, VolumeMotion,
};
use crate::params::{ExtractionMethod, ProcessingMethod};

/// Motion-correction settings stored with the run.
#[derive(Clone, Debug)]
pub struct CaimanMotionParams {
    pub is_3d: bool,
    pub pw_rigid: bool,
    pub strides: Vec<usize>,
    pub overlaps: Vec<usize>,
}

/// Column-compressed spatial footprints (`pixels x components`).
struct SparseFootprints {
    data: Array1<f32>,
    indices: Array1<i64>,
    indptr: Array1<i64>,
    components: usize,
}

pub struct CaimanResult {
    output_dir: PathBuf,
    archive: ResultArchive,
    creation_time: DateTime<Utc>,
    params: Memo<CaimanMotionParams>,
    motion: Memo<VolumeMotion>,
    summary: Memo<SummarySource>,
    masks: Memo<Vec<LoadedMask>>,
    denoised: Memo<Array2<f32>>,
    deconvolved: Memo<Array2<f32>>,
    dff: Memo<Array2<f32>>,
}

impl CaimanResult {
    /// Find the first archive in `output_dir` holding every required member.
    pub fn open(output_dir: &Path) -> Result<Self> {
        let dir = require_dir(ProcessingMethod::Caiman, output_dir, "*.npz")?;

        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "npz"))
            .collect();
        candidates.sort();

        let mut closest: Option<Vec<String>> = None;
        for path in candidates {
            let archive = match ResultArchive::open(&path) {
                Ok(archive) => archive,
                Err(err) => {
                    debug!(path = %path.display(), %err, "Skipping unreadable archive");
                    continue;
                }
            };
            let missing = archive.missing(&CAIMAN_REQUIRED_MEMBERS);
            if missing.is_empty() {
                let creation_time = modified_time(&path)?;
                debug!(archive = %path.display(), "Opened CaImAn output");
                return Ok(Self {
                    output_dir: dir,
                    archive,
                    creation_time,
                    params: Memo::new(),
                    motion: Memo::new(),
                    summary: Memo::new(),
                    masks: Memo::new(),
                    denoised: Memo::new(),
                    deconvolved: Memo::new(),
                    dff: Memo::new(),
                });
            }
            if closest.as_ref().map_or(true, |best| missing.len() < best.len()) {
                closest = Some(missing);
            }
        }

        let missing = closest.unwrap_or_else(|| {
            CAIMAN_REQUIRED_MEMBERS.iter().map(|m| m.to_string()).collect()
        });
        Err(ImagingError::missing("caiman", dir, missing))
    }

    pub fn archive(&self) -> &ResultArchive {
        &self.archive
    }

    pub fn motion_params(&self) -> Result<&CaimanMotionParams> {
        self.params.get_or_try_load(|| {
            let is_3d = self.flag("params/motion/is3D")?;
            let pw_rigid = self.flag("params/motion/pw_rigid")?;
            Ok(CaimanMotionParams {
                is_3d,
                pw_rigid,
                strides: self.sizes("params/motion/strides")?,
                overlaps: self.sizes("params/motion/overlaps")?,
            })
        })
    }

    pub fn params_loaded(&self) -> bool {
        self.params.is_loaded()
    }

    /// Completed loads of the shift, image and trace groups.
    pub fn array_load_count(&self) -> usize {
        self.motion.load_count()
            + self.summary.load_count()
            + self.denoised.load_count()
            + self.deconvolved.load_count()
            + self.dff.load_count()
    }

    fn flag(&self, name: &str) -> Result<bool> {
        Ok(self.archive.read_optional::<bool>(name)?.is_some_and(|a| a.iter().any(|v| *v)))
    }

    fn sizes(&self, name: &str) -> Result<Vec<usize>> {
        Ok(self
            .archive
            .read_optional::<u64>(name)?
            .map(|a| a.iter().map(|v| *v as usize).collect())
            .unwrap_or_default())
    }

    fn required2(&self, name: &str) -> Result<Array2<f32>> {
        let array = self.archive.read::<f32>(name)?;
        member_dim(&self.archive, name, array)
    }

    fn require(&self, names: &[&str]) -> Result<()> {
        let missing = self.archive.missing(names);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ImagingError::missing("caiman", self.archive.path(), missing))
        }
    }

    fn load_motion(&self) -> Result<VolumeMotion> {
        let params = self.motion_params()?.clone();

        let rigid = if params.pw_rigid {
            None
        } else {
            self.require(&["motion_correction/shifts_rig"])?;
            Some(self.required2("motion_correction/shifts_rig")?)
        };

        let blocks = if params.pw_rigid {
            let mut required = vec![
                "motion_correction/x_shifts_els",
                "motion_correction/y_shifts_els",
                "motion_correction/coord_shifts_els",
            ];
            if params.is_3d {
                required.push("motion_correction/z_shifts_els");
            }
            self.require(&required)?;

            let coords = self.archive.read::<i64>("motion_correction/coord_shifts_els")?;
            let coords: Array2<i64> =
                member_dim(&self.archive, "motion_correction/coord_shifts_els", coords)?;
            Some(VolumeBlocks {
                strides: params.strides.clone(),
                overlaps: params.overlaps.clone(),
                coords,
                x_shifts: self.required2("motion_correction/x_shifts_els")?,
                y_shifts: self.required2("motion_correction/y_shifts_els")?,
                z_shifts: if params.is_3d {
                    Some(self.required2("motion_correction/z_shifts_els")?)
                } else {
                    None
                },
            })
        } else {
            None
        };

        Ok(VolumeMotion {
            is_3d: params.is_3d,
            rigid,
            blocks,
        })
    }

    fn dims(&self) -> Result<Vec<usize>> {
        let dims = self.sizes("dims")?;
        if dims.is_empty() {
            return Err(ImagingError::missing("caiman", self.archive.path(), vec!["dims".into()]));
        }
        Ok(dims)
    }

    fn footprints(&self) -> Result<SparseFootprints> {
        let data = self.archive.read::<f32>("estimates/A/data")?;
        let indices = self.archive.read::<i64>("estimates/A/indices")?;
        let indptr = self.archive.read::<i64>("estimates/A/indptr")?;
        let shape = self.archive.read::<u64>("estimates/A/shape")?;

        let data: Array1<f32> = member_dim(&self.archive, "estimates/A/data", data)?;
        let indices: Array1<i64> = member_dim(&self.archive, "estimates/A/indices", indices)?;
        let indptr: Array1<i64> = member_dim(&self.archive, "estimates/A/indptr", indptr)?;
        let shape: Array1<u64> = member_dim::<u64, Ix1>(&self.archive, "estimates/A/shape", shape)?;

        let components = shape.get(1).copied().unwrap_or(0) as usize;
        if indptr.len() != components + 1 || data.len() != indices.len() {
            return Err(ImagingError::ShapeMismatch(format!(
                "{}: footprint matrix with {components} components has {} column pointers, {} values and {} indices",
                self.archive.path().display(),
                indptr.len(),
                data.len(),
                indices.len()
            )));
        }
        Ok(SparseFootprints {
            data,
            indices,
            indptr,
            components,
        })
    }

    fn extract_masks(&self) -> Result<Vec<LoadedMask>> {
        let params = self.motion_params()?;
        let dims = self.dims()?;
        let footprints = self.footprints()?;
        let accepted: Option<Vec<i64>> = self
            .archive
            .read_optional::<i64>("estimates/idx_components")?
            .map(|a| a.iter().copied().collect());

        let d1 = dims[0] as i64;
        let d2 = dims.get(1).copied().unwrap_or(1) as i64;

        let mut masks = Vec::with_capacity(footprints.components);
        for comp in 0..footprints.components {
            let start = footprints.indptr[comp] as usize;
            let end = footprints.indptr[comp + 1] as usize;
            if end < start || end > footprints.data.len() {
                return Err(ImagingError::ShapeMismatch(format!(
                    "{}: column {comp} spans {start}..{end} of {} values",
                    self.archive.path().display(),
                    footprints.data.len()
                )));
            }

            let mut mask = LoadedMask {
                pixel_count: end - start,
                zpix: params.is_3d.then(Vec::new),
                is_cell: accepted.as_ref().map(|idx| idx.contains(&(comp as i64))),
                ..LoadedMask::default()
            };
            let (mut sum_x, mut sum_y, mut sum_z, mut total) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
            for j in start..end {
                // Column-major (Fortran) unravel of the flat pixel index.
                let ind = footprints.indices[j];
                let weight = footprints.data[j];
                let x = ind % d1;
                let y = (ind / d1) % d2;
                let z = ind / (d1 * d2);
                mask.xpix.push(x);
                mask.ypix.push(y);
                if let Some(zpix) = mask.zpix.as_mut() {
                    zpix.push(z);
                }
                mask.weights.push(weight);

                let w = f64::from(weight);
                sum_x += w * x as f64;
                sum_y += w * y as f64;
                sum_z += w * z as f64;
                total += w;
            }
            if total != 0.0 {
                mask.center_x = (sum_x / total) as i64;
                mask.center_y = (sum_y / total) as i64;
                if params.is_3d {
                    mask.center_z = Some((sum_z / total) as i64);
                }
            }
            masks.push(mask);
        }

        debug!(masks = masks.len(), "Extracted CaImAn footprints");
        Ok(masks)
    }

    fn traces_member<'a>(
        &'a self,
        memo: &'a Memo<Array2<f32>>,
        name: &str,
    ) -> Result<&'a Array2<f32>> {
        memo.get_or_try_load(|| {
            self.require(&[name])?;
            self.required2(name)
        })
    }
}

impl LoadedResult for CaimanResult {
    fn method(&self) -> ProcessingMethod {
        ProcessingMethod::Caiman
    }

    fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    fn curation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    fn alignment_channel(&self) -> Result<u32> {
        Ok(0)
    }

    fn segmentation_channel(&self) -> Result<u32> {
        Ok(0)
    }

    fn plane_indices(&self) -> Vec<usize> {
        vec![0]
    }

    fn motion(&self) -> Result<MotionShifts> {
        self.motion
            .get_or_try_load(|| self.load_motion())
            .map(|motion| MotionShifts::Volume(motion.clone()))
    }

    fn summary_images(&self) -> Result<SummarySource> {
        self.summary
            .get_or_try_load(|| {
                Ok(SummarySource::Volume {
                    reference: self.archive.read("motion_correction/reference_image")?,
                    average: self.archive.read("motion_correction/average_image")?,
                    correlation: self.archive.read_optional("motion_correction/correlation_image")?,
                    max_projection: self.archive.read_optional("motion_correction/max_image")?,
                })
            })
            .cloned()
    }

    fn masks(&self) -> Result<Vec<PlaneMasks>> {
        let masks = self.masks.get_or_try_load(|| self.extract_masks())?;
        Ok(vec![PlaneMasks {
            plane: 0,
            masks: masks.clone(),
        }])
    }

    fn fluorescence(&self) -> Result<Vec<PlaneTraces>> {
        Ok(vec![PlaneTraces {
            plane: 0,
            channels: vec![ChannelTraces {
                channel: 0,
                follows_segmentation: true,
                fluorescence: self.traces_member(&self.denoised, "estimates/C")?.clone(),
                neuropil: None,
            }],
        }])
    }

    fn activity(&self, method: ExtractionMethod) -> Result<Vec<PlaneActivity>> {
        let (memo, member) = match method {
            ExtractionMethod::CaimanDeconvolution => (&self.deconvolved, "estimates/S"),
            ExtractionMethod::CaimanDff => (&self.dff, "estimates/F_dff"),
            other => {
                return Err(ImagingError::InvalidConfig(format!(
                    "caiman output has no {other} activity"
                )))
            }
        };
        Ok(vec![PlaneActivity {
            plane: 0,
            channel: 0,
            follows_segmentation: true,
            activity: self.traces_member(memo, member)?.clone(),
        }])
    }
}

pub struct CaimanLoader;

impl ResultLoader for CaimanLoader {
    fn method(&self) -> ProcessingMethod {
        ProcessingMethod::Caiman
    }

    fn open(&self, output_dir: &Path) -> Result<Box<dyn LoadedResult>> {
        Ok(Box::new(CaimanResult::open(output_dir)?))
    }
}
