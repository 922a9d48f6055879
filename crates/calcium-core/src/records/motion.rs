use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::keys::CurationKey;

/// Half-open pixel (or plane) span `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockExtent {
    pub start: i64,
    pub end: i64,
}

impl BlockExtent {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Whole-frame translation estimates.
///
/// Shift arrays are `(series, frames)`: one row per contributing plane for
/// per-plane tools, a single row for a joint volumetric estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidCorrection {
    pub y_shifts: Array2<f32>,
    pub x_shifts: Array2<f32>,
    pub z_shifts: Array2<f32>,
    pub y_std: f64,
    pub x_std: f64,
    /// Only defined when the tool estimated z motion.
    pub z_std: Option<f64>,
    pub outlier_frames: Option<Array1<bool>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_id: usize,
    pub extent_y: BlockExtent,
    pub extent_x: BlockExtent,
    pub extent_z: BlockExtent,
    pub y_shifts: Array2<f32>,
    pub x_shifts: Array2<f32>,
    pub z_shifts: Array2<f32>,
    pub y_std: f64,
    pub x_std: f64,
    pub z_std: Option<f64>,
}

/// Piecewise (per-block) motion estimates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NonRigidGrid {
    pub block_height: usize,
    pub block_width: usize,
    pub block_depth: usize,
    pub block_count_y: usize,
    pub block_count_x: usize,
    pub block_count_z: usize,
    pub outlier_frames: Option<Array1<bool>>,
    pub blocks: Vec<Block>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryImages {
    pub field_idx: usize,
    pub reference: Array2<f32>,
    pub average: Array2<f32>,
    pub correlation: Option<Array2<f32>>,
    pub max_projection: Option<Array2<f32>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionCorrectionRecord {
    pub key: CurationKey,
    pub alignment_channel: u32,
    pub rigid: Option<RigidCorrection>,
    pub nonrigid: Option<NonRigidGrid>,
    /// One entry per field, ordered by field index.
    pub summary_images: Vec<SummaryImages>,
}
