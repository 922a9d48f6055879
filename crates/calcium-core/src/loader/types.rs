//! Canonical in-memory view every backend translates its output into.

use ndarray::{Array1, Array2, ArrayD};

use crate::records::BlockExtent;

/// Per-frame whole-image shifts of one plane.
#[derive(Clone, Debug)]
pub struct RigidShifts {
    pub y: Array1<f32>,
    pub x: Array1<f32>,
}

/// Block tiling of one plane with per-frame per-block shifts.
#[derive(Clone, Debug)]
pub struct PlaneBlocks {
    /// `(height, width)` of one block.
    pub block_size: [usize; 2],
    /// `(y, x)` number of blocks.
    pub block_count: [usize; 2],
    pub y_extents: Vec<BlockExtent>,
    pub x_extents: Vec<BlockExtent>,
    /// `(frames, blocks)`.
    pub y_shifts: Array2<f32>,
    pub x_shifts: Array2<f32>,
}

impl PlaneBlocks {
    pub fn len(&self) -> usize {
        self.y_extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y_extents.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct PlaneMotion {
    pub plane: usize,
    pub rigid: RigidShifts,
    pub bad_frames: Option<Array1<bool>>,
    pub blocks: Option<PlaneBlocks>,
}

/// Flat block list of a joint (whole-volume) estimate.
#[derive(Clone, Debug)]
pub struct VolumeBlocks {
    /// Per-axis strides, `(y, x)` or `(y, x, z)`.
    pub strides: Vec<usize>,
    pub overlaps: Vec<usize>,
    /// `(blocks, 4)` as `[x0, x1, y0, y1]`, or `(blocks, 6)` adding `[z0, z1]`.
    pub coords: Array2<i64>,
    /// `(frames, blocks)`.
    pub x_shifts: Array2<f32>,
    pub y_shifts: Array2<f32>,
    pub z_shifts: Option<Array2<f32>>,
}

/// Joint estimate spanning every acquired dimension.
#[derive(Clone, Debug)]
pub struct VolumeMotion {
    pub is_3d: bool,
    /// `(frames, dims)` with columns x, y and (3-D only) z.
    pub rigid: Option<Array2<f32>>,
    pub blocks: Option<VolumeBlocks>,
}

#[derive(Clone, Debug)]
pub enum MotionShifts {
    /// One independent estimate per plane.
    PerPlane(Vec<PlaneMotion>),
    Volume(VolumeMotion),
}

#[derive(Clone, Debug)]
pub struct PlaneImages {
    pub plane: usize,
    pub reference: Array2<f32>,
    pub average: Array2<f32>,
    pub correlation: Option<Array2<f32>>,
    pub max_projection: Option<Array2<f32>>,
}

#[derive(Clone, Debug)]
pub enum SummarySource {
    PerPlane(Vec<PlaneImages>),
    /// Each image is `(height, width)` or `(height, width, depth)`.
    Volume {
        reference: ArrayD<f32>,
        average: ArrayD<f32>,
        correlation: Option<ArrayD<f32>>,
        max_projection: Option<ArrayD<f32>>,
    },
}

/// One segmented region as reported by the tool.
#[derive(Clone, Debug, Default)]
pub struct LoadedMask {
    pub xpix: Vec<i64>,
    pub ypix: Vec<i64>,
    /// Present only for volumetric segmentations.
    pub zpix: Option<Vec<i64>>,
    pub weights: Vec<f32>,
    pub pixel_count: usize,
    pub center_x: i64,
    pub center_y: i64,
    /// Explicit depth, overriding the plane index.
    pub center_z: Option<i64>,
    /// `None` when the tool has no classifier.
    pub is_cell: Option<bool>,
    pub confidence: Option<f32>,
}

#[derive(Clone, Debug)]
pub struct PlaneMasks {
    pub plane: usize,
    pub masks: Vec<LoadedMask>,
}

#[derive(Clone, Debug)]
pub struct ChannelTraces {
    pub channel: u32,
    /// The series belongs to whichever channel was segmented.
    pub follows_segmentation: bool,
    /// `(masks, frames)`.
    pub fluorescence: Array2<f32>,
    pub neuropil: Option<Array2<f32>>,
}

#[derive(Clone, Debug)]
pub struct PlaneTraces {
    pub plane: usize,
    pub channels: Vec<ChannelTraces>,
}

#[derive(Clone, Debug)]
pub struct PlaneActivity {
    pub plane: usize,
    pub channel: u32,
    pub follows_segmentation: bool,
    /// `(masks, frames)`.
    pub activity: Array2<f32>,
}
