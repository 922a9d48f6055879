//! Suite2p output: one `planeN/` directory per plane with fixed-name files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::consts::{
    SUITE2P_COMBINED_DIR, SUITE2P_ISCELL_FILE, SUITE2P_OPS_FILE, SUITE2P_PLANE_PREFIX,
    SUITE2P_STAT_FILE,
};
use crate::error::{ImagingError, Result};
use crate::io::npy::read_npy;
use crate::loader::{
    modified_time, read_optional_npy, require_dir, ChannelTraces, LoadedMask, LoadedResult, Memo,
    MotionShifts, PlaneActivity, PlaneBlocks, PlaneImages, PlaneMasks, PlaneMotion, PlaneTraces,
    ResultLoader, RigidShifts, SummarySource,
};
use crate::params::{ExtractionMethod, ProcessingMethod};
use crate::records::BlockExtent;

/// Scalar registration/segmentation options of one plane.
#[derive(Clone, Debug, Deserialize)]
pub struct Suite2pOps {
    pub nframes: usize,
    #[serde(rename = "Ly")]
    pub ly: usize,
    #[serde(rename = "Lx")]
    pub lx: usize,
    /// 1-based.
    #[serde(default = "first_channel")]
    pub align_by_chan: u32,
    /// 1-based.
    #[serde(default = "first_channel")]
    pub functional_chan: u32,
    #[serde(default)]
    pub nonrigid: bool,
    #[serde(default)]
    pub block_size: Option<[usize; 2]>,
    #[serde(default)]
    pub nblocks: Option<[usize; 2]>,
    #[serde(default)]
    pub yblock: Vec<[i64; 2]>,
    #[serde(default)]
    pub xblock: Vec<[i64; 2]>,
    #[serde(default)]
    pub iplane: Option<usize>,
}

fn first_channel() -> u32 {
    1
}

/// Per-ROI statistics.
#[derive(Clone, Debug, Deserialize)]
pub struct RoiStat {
    pub ypix: Vec<i64>,
    pub xpix: Vec<i64>,
    pub lam: Vec<f32>,
    /// `(y, x)` median pixel.
    pub med: [f64; 2],
    #[serde(default)]
    pub npix: Option<usize>,
    /// Explicit plane for ROIs of interleaved recordings.
    #[serde(default)]
    pub iplane: Option<i64>,
}

/// One `planeN/` directory, read lazily.
pub struct Suite2pPlane {
    dir: PathBuf,
    pub plane_idx: usize,
    pub creation_time: DateTime<Utc>,
    pub curation_time: DateTime<Utc>,
    ops: Memo<Suite2pOps>,
    stat: Memo<Vec<RoiStat>>,
    iscell: Memo<Array2<f32>>,
    motion: Memo<PlaneMotion>,
    images: Memo<PlaneImages>,
    masks: Memo<PlaneMasks>,
    traces: Memo<PlaneTraces>,
    spikes: Memo<PlaneActivity>,
}

impl Suite2pPlane {
    /// Open a plane directory. `segmented` additionally requires the
    /// classifier output, which registration-only runs do not write.
    pub fn open(dir: &Path, plane_idx: usize, segmented: bool) -> Result<Self> {
        let ops_path = dir.join(SUITE2P_OPS_FILE);
        let iscell_path = dir.join(SUITE2P_ISCELL_FILE);

        let mut missing = Vec::new();
        if !ops_path.exists() {
            missing.push(SUITE2P_OPS_FILE.to_string());
        }
        if segmented && !iscell_path.exists() {
            missing.push(SUITE2P_ISCELL_FILE.to_string());
        }
        if !missing.is_empty() {
            return Err(ImagingError::missing("suite2p", dir, missing));
        }

        let creation_time = modified_time(&ops_path)?;
        let curation_time = if iscell_path.exists() {
            modified_time(&iscell_path)?
        } else {
            creation_time
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            plane_idx,
            creation_time,
            curation_time,
            ops: Memo::new(),
            stat: Memo::new(),
            iscell: Memo::new(),
            motion: Memo::new(),
            images: Memo::new(),
            masks: Memo::new(),
            traces: Memo::new(),
            spikes: Memo::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ops(&self) -> Result<&Suite2pOps> {
        self.ops.get_or_try_load(|| {
            let path = self.dir.join(SUITE2P_OPS_FILE);
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents).map_err(|e| {
                ImagingError::InvalidLayout(format!("{}: {e}", path.display()))
            })
        })
    }

    pub fn ops_loaded(&self) -> bool {
        self.ops.is_loaded()
    }

    pub fn ops_load_count(&self) -> usize {
        self.ops.load_count()
    }

    /// Completed loads of the trace files, across both channels.
    pub fn traces_load_count(&self) -> usize {
        self.traces.load_count()
    }

    pub fn stat(&self) -> Result<&[RoiStat]> {
        self.stat
            .get_or_try_load(|| {
                let path = self.dir.join(SUITE2P_STAT_FILE);
                if !path.exists() {
                    return Ok(Vec::new());
                }
                let contents = std::fs::read_to_string(&path)?;
                serde_json::from_str(&contents).map_err(|e| {
                    ImagingError::InvalidLayout(format!("{}: {e}", path.display()))
                })
            })
            .map(Vec::as_slice)
    }

    /// `(rois, 2)`: classifier verdict and cell probability.
    pub fn iscell(&self) -> Result<&Array2<f32>> {
        self.iscell
            .get_or_try_load(|| read_npy::<f32, Ix2>(&self.dir.join(SUITE2P_ISCELL_FILE)))
    }

    pub fn alignment_channel(&self) -> Result<u32> {
        Ok(self.ops()?.align_by_chan.saturating_sub(1))
    }

    pub fn segmentation_channel(&self) -> Result<u32> {
        Ok(self.ops()?.functional_chan.saturating_sub(1))
    }

    fn array1(&self, name: &str) -> Result<Array1<f32>> {
        read_npy::<f32, Ix1>(&self.required(name)?)
    }

    fn array2(&self, name: &str) -> Result<Array2<f32>> {
        read_npy::<f32, Ix2>(&self.required(name)?)
    }

    fn optional2(&self, name: &str) -> Result<Option<Array2<f32>>> {
        read_optional_npy::<f32, Ix2>(&self.dir.join(name))
    }

    fn required(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        if path.exists() {
            Ok(path)
        } else {
            Err(ImagingError::missing("suite2p", &self.dir, vec![name.to_string()]))
        }
    }

    pub fn motion(&self) -> Result<&PlaneMotion> {
        self.motion.get_or_try_load(|| {
            let ops = self.ops()?;
            let rigid = RigidShifts {
                y: self.array1("yoff.npy")?,
                x: self.array1("xoff.npy")?,
            };
            let bad_frames =
                read_optional_npy::<bool, Ix1>(&self.dir.join("badframes.npy"))?;
            let blocks = if ops.nonrigid {
                Some(self.blocks(ops)?)
            } else {
                None
            };
            debug!(plane = self.plane_idx, frames = rigid.y.len(), "Loaded suite2p shifts");
            Ok(PlaneMotion {
                plane: self.plane_idx,
                rigid,
                bad_frames,
                blocks,
            })
        })
    }

    fn blocks(&self, ops: &Suite2pOps) -> Result<PlaneBlocks> {
        let (block_size, block_count) = match (ops.block_size, ops.nblocks) {
            (Some(size), Some(count)) => (size, count),
            _ => {
                return Err(ImagingError::InvalidLayout(format!(
                    "{}: non-rigid ops without block_size/nblocks",
                    self.dir.display()
                )))
            }
        };
        let y_shifts = self.array2("yoff1.npy")?;
        let x_shifts = self.array2("xoff1.npy")?;

        let n_blocks = ops.yblock.len();
        if ops.xblock.len() != n_blocks
            || y_shifts.ncols() != n_blocks
            || x_shifts.ncols() != n_blocks
        {
            return Err(ImagingError::ShapeMismatch(format!(
                "{}: {} y-blocks, {} x-blocks, shift arrays with {} and {} columns",
                self.dir.display(),
                n_blocks,
                ops.xblock.len(),
                y_shifts.ncols(),
                x_shifts.ncols()
            )));
        }

        Ok(PlaneBlocks {
            block_size,
            block_count,
            y_extents: ops.yblock.iter().map(|[a, b]| BlockExtent::new(*a, *b)).collect(),
            x_extents: ops.xblock.iter().map(|[a, b]| BlockExtent::new(*a, *b)).collect(),
            y_shifts,
            x_shifts,
        })
    }

    pub fn images(&self) -> Result<&PlaneImages> {
        self.images.get_or_try_load(|| {
            Ok(PlaneImages {
                plane: self.plane_idx,
                reference: self.array2("refImg.npy")?,
                average: self.array2("meanImg.npy")?,
                correlation: self.optional2("Vcorr.npy")?,
                max_projection: self.optional2("max_proj.npy")?,
            })
        })
    }

    pub fn masks(&self) -> Result<&PlaneMasks> {
        self.masks.get_or_try_load(|| self.load_masks())
    }

    fn load_masks(&self) -> Result<PlaneMasks> {
        let stat = self.stat()?;
        let iscell = self.iscell()?;
        if iscell.nrows() != stat.len() || iscell.ncols() < 2 {
            return Err(ImagingError::ShapeMismatch(format!(
                "{}: {} ROIs in stats but iscell has shape {:?}",
                self.dir.display(),
                stat.len(),
                iscell.shape()
            )));
        }

        let masks = stat
            .iter()
            .zip(iscell.axis_iter(Axis(0)))
            .map(|(roi, verdict)| LoadedMask {
                xpix: roi.xpix.clone(),
                ypix: roi.ypix.clone(),
                zpix: None,
                weights: roi.lam.clone(),
                pixel_count: roi.npix.unwrap_or(roi.xpix.len()),
                center_x: roi.med[1] as i64,
                center_y: roi.med[0] as i64,
                center_z: roi.iplane,
                is_cell: Some(verdict[0] != 0.0),
                confidence: Some(verdict[1]),
            })
            .collect();

        Ok(PlaneMasks {
            plane: self.plane_idx,
            masks,
        })
    }

    pub fn traces(&self) -> Result<&PlaneTraces> {
        self.traces.get_or_try_load(|| self.load_traces())
    }

    fn load_traces(&self) -> Result<PlaneTraces> {
        let mut channels = Vec::new();
        for (channel, f_name, fneu_name) in [
            (0, "F.npy", "Fneu.npy"),
            (1, "F_chan2.npy", "Fneu_chan2.npy"),
        ] {
            if let Some(fluorescence) = self.optional2(f_name)? {
                channels.push(ChannelTraces {
                    channel,
                    follows_segmentation: false,
                    fluorescence,
                    neuropil: self.optional2(fneu_name)?,
                });
            }
        }
        Ok(PlaneTraces {
            plane: self.plane_idx,
            channels,
        })
    }

    pub fn spikes(&self) -> Result<&PlaneActivity> {
        self.spikes.get_or_try_load(|| {
            Ok(PlaneActivity {
                plane: self.plane_idx,
                channel: 0,
                follows_segmentation: false,
                activity: self.array2("spks.npy")?,
            })
        })
    }
}

/// Every plane of one suite2p run.
pub struct Suite2pResult {
    output_dir: PathBuf,
    planes: BTreeMap<usize, Suite2pPlane>,
    creation_time: DateTime<Utc>,
    curation_time: DateTime<Utc>,
}

impl Suite2pResult {
    /// Open a segmented run; every plane must carry its classifier output.
    pub fn open(output_dir: &Path) -> Result<Self> {
        Self::open_with(output_dir, true)
    }

    /// Open a registration-only run.
    pub fn open_registration(output_dir: &Path) -> Result<Self> {
        Self::open_with(output_dir, false)
    }

    fn open_with(output_dir: &Path, segmented: bool) -> Result<Self> {
        let root = require_dir(ProcessingMethod::Suite2p, output_dir, SUITE2P_OPS_FILE)?;

        let mut planes = BTreeMap::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| ImagingError::InvalidLayout(e.to_string()))?;
            if entry.file_name() != SUITE2P_OPS_FILE {
                continue;
            }
            let Some(plane_dir) = entry.path().parent() else {
                continue;
            };
            let Some(plane_idx) = plane_index(plane_dir)? else {
                continue;
            };
            let plane = Suite2pPlane::open(plane_dir, plane_idx, segmented)?;
            if planes.insert(plane_idx, plane).is_some() {
                return Err(ImagingError::InvalidLayout(format!(
                    "{}: plane {plane_idx} found twice",
                    root.display()
                )));
            }
        }

        let (Some(creation_time), Some(curation_time)) = (
            planes.values().map(|p| p.creation_time).min(),
            planes.values().map(|p| p.curation_time).max(),
        ) else {
            return Err(ImagingError::missing(
                "suite2p",
                &root,
                vec![format!("{SUITE2P_PLANE_PREFIX}*/{SUITE2P_OPS_FILE}")],
            ));
        };

        debug!(dir = %root.display(), planes = planes.len(), "Opened suite2p output");
        Ok(Self {
            output_dir: root,
            planes,
            creation_time,
            curation_time,
        })
    }

    pub fn planes(&self) -> &BTreeMap<usize, Suite2pPlane> {
        &self.planes
    }

    pub fn plane(&self, idx: usize) -> Option<&Suite2pPlane> {
        self.planes.get(&idx)
    }

    fn first_plane(&self) -> Result<&Suite2pPlane> {
        self.planes.values().next().ok_or_else(|| {
            ImagingError::InvalidLayout(format!("{}: no planes", self.output_dir.display()))
        })
    }

    pub(crate) fn motion_shifts(&self) -> Result<MotionShifts> {
        let planes = self
            .planes
            .values()
            .map(|p| p.motion().cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(MotionShifts::PerPlane(planes))
    }

    pub(crate) fn summary(&self) -> Result<SummarySource> {
        let images = self
            .planes
            .values()
            .map(|p| p.images().cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(SummarySource::PerPlane(images))
    }

    pub(crate) fn first_alignment_channel(&self) -> Result<u32> {
        self.first_plane()?.alignment_channel()
    }
}

/// Plane index from a `planeN` directory name; `None` for the combined view.
fn plane_index(dir: &Path) -> Result<Option<usize>> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if name == SUITE2P_COMBINED_DIR {
        return Ok(None);
    }
    name.strip_prefix(SUITE2P_PLANE_PREFIX)
        .and_then(|idx| idx.parse::<usize>().ok())
        .map(Some)
        .ok_or_else(|| {
            ImagingError::InvalidLayout(format!(
                "{}: expected a {SUITE2P_PLANE_PREFIX}N or {SUITE2P_COMBINED_DIR} directory",
                dir.display()
            ))
        })
}

impl LoadedResult for Suite2pResult {
    fn method(&self) -> ProcessingMethod {
        ProcessingMethod::Suite2p
    }

    fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    fn curation_time(&self) -> DateTime<Utc> {
        self.curation_time
    }

    fn alignment_channel(&self) -> Result<u32> {
        self.first_alignment_channel()
    }

    fn segmentation_channel(&self) -> Result<u32> {
        self.first_plane()?.segmentation_channel()
    }

    fn plane_indices(&self) -> Vec<usize> {
        self.planes.keys().copied().collect()
    }

    fn motion(&self) -> Result<MotionShifts> {
        self.motion_shifts()
    }

    fn summary_images(&self) -> Result<SummarySource> {
        self.summary()
    }

    fn masks(&self) -> Result<Vec<PlaneMasks>> {
        self.planes.values().map(|p| p.masks().cloned()).collect()
    }

    fn fluorescence(&self) -> Result<Vec<PlaneTraces>> {
        self.planes.values().map(|p| p.traces().cloned()).collect()
    }

    fn activity(&self, method: ExtractionMethod) -> Result<Vec<PlaneActivity>> {
        match method {
            ExtractionMethod::Suite2pDeconvolution => {
                self.planes.values().map(|p| p.spikes().cloned()).collect()
            }
            other => Err(ImagingError::InvalidConfig(format!(
                "suite2p output has no {other} activity"
            ))),
        }
    }
}

pub struct Suite2pLoader;

impl ResultLoader for Suite2pLoader {
    fn method(&self) -> ProcessingMethod {
        ProcessingMethod::Suite2p
    }

    fn open(&self, output_dir: &Path) -> Result<Box<dyn LoadedResult>> {
        Ok(Box::new(Suite2pResult::open(output_dir)?))
    }
}
