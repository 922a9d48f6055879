//! Rigid and block-wise motion estimates merged into one volumetric record.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{stack, Array1, Array2, Array3, ArrayD, ArrayView1, Axis, Ix2, Ix3};
use tracing::{debug, info};

use crate::error::{ImagingError, Result};
use crate::keys::CurationKey;
use crate::loader::{
    LoadedResult, MotionShifts, PlaneImages, PlaneMotion, SummarySource, VolumeMotion,
};
use crate::normalize::stats::nanstd;
use crate::records::{
    Block, BlockExtent, MotionCorrectionRecord, NonRigidGrid, RigidCorrection, SummaryImages,
};
use crate::scan::ScanMetadata;

/// Build the motion-correction record of one curation.
pub fn normalize_motion(
    key: &CurationKey,
    result: &dyn LoadedResult,
    scan: &ScanMetadata,
) -> Result<MotionCorrectionRecord> {
    let alignment_channel = result.alignment_channel()?;

    let (rigid, nonrigid, is_3d) = match result.motion()? {
        MotionShifts::PerPlane(planes) => {
            let rigid = stack_rigid(&planes)?;
            let grid = merge_plane_blocks(&planes)?;
            (Some(rigid), grid, false)
        }
        MotionShifts::Volume(volume) => {
            (volume_rigid(&volume)?, volume_blocks(&volume)?, volume.is_3d)
        }
    };

    if let Some(rigid) = &rigid {
        check_frames("rigid shifts", rigid.x_shifts.ncols(), scan.frame_count)?;
    }
    if let Some(grid) = &nonrigid {
        for block in &grid.blocks {
            check_frames("block shifts", block.x_shifts.ncols(), scan.frame_count)?;
        }
    }

    let summary_images = match result.summary_images()? {
        SummarySource::PerPlane(images) => plane_summaries(images, scan)?,
        SummarySource::Volume {
            reference,
            average,
            correlation,
            max_projection,
        } => {
            let depth = expected_depth(is_3d, scan, &reference, nonrigid.as_ref());
            SummaryVolumes::broadcast(reference, average, correlation, max_projection, depth)?
                .into_fields()
        }
    };

    info!(
        key = %key,
        rigid = rigid.is_some(),
        blocks = nonrigid.as_ref().map_or(0, |g| g.blocks.len()),
        fields = summary_images.len(),
        "Normalized motion correction"
    );

    Ok(MotionCorrectionRecord {
        key: key.clone(),
        alignment_channel,
        rigid,
        nonrigid,
        summary_images,
    })
}

fn check_frames(what: &str, found: usize, expected: usize) -> Result<()> {
    if found == expected {
        Ok(())
    } else {
        Err(ImagingError::ShapeMismatch(format!(
            "{what} cover {found} frames but the scan has {expected}"
        )))
    }
}

fn stack_rows(rows: &[ArrayView1<'_, f32>], what: &str) -> Result<Array2<f32>> {
    stack(Axis(0), rows)
        .map_err(|e| ImagingError::ShapeMismatch(format!("cannot stack {what}: {e}")))
}

/// Logical OR of the outlier masks that are present.
fn combine_outliers<'a>(
    masks: impl IntoIterator<Item = &'a Array1<bool>>,
    frames: usize,
) -> Result<Option<Array1<bool>>> {
    let mut combined: Option<Array1<bool>> = None;
    for mask in masks {
        if mask.len() != frames {
            return Err(ImagingError::ShapeMismatch(format!(
                "outlier mask covers {} frames, shifts cover {frames}",
                mask.len()
            )));
        }
        combined = Some(match combined {
            None => mask.clone(),
            Some(acc) => ndarray::Zip::from(&acc).and(mask).map_collect(|a, b| *a || *b),
        });
    }
    Ok(combined)
}

/// Stack per-plane rigid series into `(planes, frames)` arrays.
///
/// Standard deviations are taken over the flattened stack.
pub fn stack_rigid(planes: &[PlaneMotion]) -> Result<RigidCorrection> {
    if planes.is_empty() {
        return Err(ImagingError::ShapeMismatch("no planes with rigid shifts".into()));
    }

    let ys: Vec<_> = planes.iter().map(|p| p.rigid.y.view()).collect();
    let xs: Vec<_> = planes.iter().map(|p| p.rigid.x.view()).collect();
    let y_shifts = stack_rows(&ys, "per-plane y shifts")?;
    let x_shifts = stack_rows(&xs, "per-plane x shifts")?;
    if y_shifts.dim() != x_shifts.dim() {
        return Err(ImagingError::ShapeMismatch(format!(
            "y shifts {:?} and x shifts {:?} differ",
            y_shifts.dim(),
            x_shifts.dim()
        )));
    }

    let outlier_frames =
        combine_outliers(planes.iter().filter_map(|p| p.bad_frames.as_ref()), x_shifts.ncols())?;

    Ok(RigidCorrection {
        y_std: nanstd(&y_shifts),
        x_std: nanstd(&x_shifts),
        z_shifts: Array2::zeros(x_shifts.raw_dim()),
        z_std: None,
        y_shifts,
        x_shifts,
        outlier_frames,
    })
}

struct BlockRows<'a> {
    extent_y: BlockExtent,
    extent_x: BlockExtent,
    first_plane: usize,
    last_plane: usize,
    y: Vec<ArrayView1<'a, f32>>,
    x: Vec<ArrayView1<'a, f32>>,
}

/// Merge per-plane block lists by block id.
///
/// Each merged block carries one shift row per plane and spans the planes
/// it was seen in along z.
pub fn merge_plane_blocks(planes: &[PlaneMotion]) -> Result<Option<NonRigidGrid>> {
    let with_blocks: Vec<_> = planes
        .iter()
        .filter_map(|p| p.blocks.as_ref().map(|b| (p, b)))
        .collect();
    let Some((_, first)) = with_blocks.first() else {
        return Ok(None);
    };

    let mut merged: BTreeMap<usize, BlockRows<'_>> = BTreeMap::new();
    for (plane, blocks) in &with_blocks {
        if blocks.block_size != first.block_size || blocks.block_count != first.block_count {
            return Err(ImagingError::ShapeMismatch(format!(
                "plane {} tiles {:?} blocks of {:?}, plane {} tiles {:?} of {:?}",
                plane.plane,
                blocks.block_count,
                blocks.block_size,
                with_blocks[0].0.plane,
                first.block_count,
                first.block_size
            )));
        }
        for block_id in 0..blocks.len() {
            let y = blocks.y_shifts.column(block_id);
            let x = blocks.x_shifts.column(block_id);
            merged
                .entry(block_id)
                .and_modify(|rows| {
                    rows.last_plane = plane.plane;
                    rows.y.push(y);
                    rows.x.push(x);
                })
                .or_insert_with(|| BlockRows {
                    extent_y: blocks.y_extents[block_id],
                    extent_x: blocks.x_extents[block_id],
                    first_plane: plane.plane,
                    last_plane: plane.plane,
                    y: vec![y],
                    x: vec![x],
                });
        }
    }

    let mut out = Vec::with_capacity(merged.len());
    for (block_id, rows) in merged {
        let y_shifts = stack_rows(&rows.y, "block y shifts")?;
        let x_shifts = stack_rows(&rows.x, "block x shifts")?;
        out.push(Block {
            block_id,
            extent_y: rows.extent_y,
            extent_x: rows.extent_x,
            extent_z: BlockExtent::new(rows.first_plane as i64, rows.last_plane as i64 + 1),
            y_std: nanstd(&y_shifts),
            x_std: nanstd(&x_shifts),
            z_shifts: Array2::zeros(x_shifts.raw_dim()),
            z_std: None,
            y_shifts,
            x_shifts,
        });
    }

    let frames = out.first().map_or(0, |b| b.x_shifts.ncols());
    let outlier_frames = combine_outliers(
        with_blocks.iter().filter_map(|(p, _)| p.bad_frames.as_ref()),
        frames,
    )?;

    debug!(blocks = out.len(), planes = planes.len(), "Merged per-plane blocks");
    Ok(Some(NonRigidGrid {
        block_height: first.block_size[0],
        block_width: first.block_size[1],
        block_depth: 1,
        block_count_y: first.block_count[0],
        block_count_x: first.block_count[1],
        block_count_z: planes.len(),
        outlier_frames,
        blocks: out,
    }))
}

/// Use a joint `(frames, dims)` estimate directly, one row per axis.
pub fn volume_rigid(volume: &VolumeMotion) -> Result<Option<RigidCorrection>> {
    let Some(shifts) = &volume.rigid else {
        return Ok(None);
    };
    let needed = if volume.is_3d { 3 } else { 2 };
    if shifts.ncols() < needed {
        return Err(ImagingError::ShapeMismatch(format!(
            "joint rigid shifts have {} columns, need {needed}",
            shifts.ncols()
        )));
    }

    let row = |axis: usize| shifts.column(axis).insert_axis(Axis(0)).to_owned();
    let x_shifts = row(0);
    let y_shifts = row(1);
    let (z_shifts, z_std) = if volume.is_3d {
        let z = row(2);
        let std = nanstd(&z);
        (z, Some(std))
    } else {
        (Array2::zeros(x_shifts.raw_dim()), None)
    };

    Ok(Some(RigidCorrection {
        y_std: nanstd(&y_shifts),
        x_std: nanstd(&x_shifts),
        y_shifts,
        x_shifts,
        z_shifts,
        z_std,
        outlier_frames: None,
    }))
}

fn distinct(column: ArrayView1<'_, i64>) -> usize {
    column.iter().collect::<BTreeSet<_>>().len()
}

/// Describe a flat block list as a grid.
///
/// Counts per axis are the distinct block starts; block size is stride plus
/// overlap, with depth 1 for planar acquisitions.
pub fn volume_blocks(volume: &VolumeMotion) -> Result<Option<NonRigidGrid>> {
    let Some(blocks) = &volume.blocks else {
        return Ok(None);
    };
    let axes = if volume.is_3d { 3 } else { 2 };
    if blocks.strides.len() < axes || blocks.overlaps.len() < axes {
        return Err(ImagingError::InvalidLayout(format!(
            "block grid needs {axes} strides and overlaps, found {} and {}",
            blocks.strides.len(),
            blocks.overlaps.len()
        )));
    }
    let coords = &blocks.coords;
    let n_blocks = coords.nrows();
    if coords.ncols() < 2 * axes {
        return Err(ImagingError::ShapeMismatch(format!(
            "block coordinates have {} columns, need {}",
            coords.ncols(),
            2 * axes
        )));
    }
    let z_source = blocks.z_shifts.as_ref();
    for (what, shifts) in [("x", Some(&blocks.x_shifts)), ("y", Some(&blocks.y_shifts)), ("z", z_source)] {
        if let Some(shifts) = shifts {
            if shifts.ncols() != n_blocks {
                return Err(ImagingError::ShapeMismatch(format!(
                    "{what} block shifts have {} columns for {n_blocks} blocks",
                    shifts.ncols()
                )));
            }
        }
    }

    let extent = |b: usize, col: usize| BlockExtent::new(coords[[b, col]], coords[[b, col + 1]]);
    let block_list = (0..n_blocks)
        .map(|b| {
            let row = |shifts: &Array2<f32>| shifts.column(b).insert_axis(Axis(0)).to_owned();
            let x_shifts = row(&blocks.x_shifts);
            let y_shifts = row(&blocks.y_shifts);
            let (z_shifts, z_std) = match z_source {
                Some(z) if volume.is_3d => {
                    let z = row(z);
                    let std = nanstd(&z);
                    (z, Some(std))
                }
                _ => (Array2::zeros(x_shifts.raw_dim()), None),
            };
            Block {
                block_id: b,
                extent_x: extent(b, 0),
                extent_y: extent(b, 2),
                extent_z: if volume.is_3d {
                    extent(b, 4)
                } else {
                    BlockExtent::new(0, 1)
                },
                y_std: nanstd(&y_shifts),
                x_std: nanstd(&x_shifts),
                y_shifts,
                x_shifts,
                z_shifts,
                z_std,
            }
        })
        .collect();

    Ok(Some(NonRigidGrid {
        block_height: blocks.strides[0] + blocks.overlaps[0],
        block_width: blocks.strides[1] + blocks.overlaps[1],
        block_depth: if volume.is_3d {
            blocks.strides[2] + blocks.overlaps[2]
        } else {
            1
        },
        block_count_x: distinct(coords.column(0)),
        block_count_y: distinct(coords.column(2)),
        block_count_z: if volume.is_3d {
            distinct(coords.column(4))
        } else {
            1
        },
        outlier_frames: None,
        blocks: block_list,
    }))
}

fn plane_summaries(images: Vec<PlaneImages>, scan: &ScanMetadata) -> Result<Vec<SummaryImages>> {
    if !scan.fields.is_empty() && images.len() != scan.fields.len() {
        return Err(ImagingError::ShapeMismatch(format!(
            "{} planes of summary images for {} fields",
            images.len(),
            scan.fields.len()
        )));
    }
    Ok(images
        .into_iter()
        .map(|img| SummaryImages {
            field_idx: img.plane,
            reference: img.reference,
            average: img.average,
            correlation: img.correlation,
            max_projection: img.max_projection,
        })
        .collect())
}

fn expected_depth(
    is_3d: bool,
    scan: &ScanMetadata,
    reference: &ArrayD<f32>,
    grid: Option<&NonRigidGrid>,
) -> usize {
    if !is_3d {
        1
    } else if !scan.fields.is_empty() {
        scan.fields.len()
    } else if reference.ndim() == 3 {
        reference.shape()[2]
    } else {
        grid.map_or(1, |g| g.block_count_z)
    }
}

/// Summary images as `(depth, height, width)` stacks.
#[derive(Clone, Debug)]
pub struct SummaryVolumes {
    pub reference: Array3<f32>,
    pub average: Array3<f32>,
    pub correlation: Option<Array3<f32>>,
    pub max_projection: Option<Array3<f32>>,
}

impl SummaryVolumes {
    /// Bring every image to `depth` fields, tiling planar images along z.
    pub fn broadcast(
        reference: ArrayD<f32>,
        average: ArrayD<f32>,
        correlation: Option<ArrayD<f32>>,
        max_projection: Option<ArrayD<f32>>,
        depth: usize,
    ) -> Result<Self> {
        Ok(Self {
            reference: broadcast_to_depth(reference, depth)?,
            average: broadcast_to_depth(average, depth)?,
            correlation: correlation.map(|c| broadcast_to_depth(c, depth)).transpose()?,
            max_projection: max_projection
                .map(|m| broadcast_to_depth(m, depth))
                .transpose()?,
        })
    }

    pub fn depth(&self) -> usize {
        self.reference.len_of(Axis(0))
    }

    /// One summary entry per field.
    pub fn into_fields(self) -> Vec<SummaryImages> {
        let plane = |stack: &Array3<f32>, z: usize| stack.index_axis(Axis(0), z).to_owned();
        (0..self.depth())
            .map(|z| SummaryImages {
                field_idx: z,
                reference: plane(&self.reference, z),
                average: plane(&self.average, z),
                correlation: self.correlation.as_ref().map(|c| plane(c, z)),
                max_projection: self.max_projection.as_ref().map(|m| plane(m, z)),
            })
            .collect()
    }
}

/// `(h, w)` is tiled to `(depth, h, w)`; `(h, w, d)` is reordered to
/// `(d, h, w)` and must already have `depth` planes.
pub fn broadcast_to_depth(image: ArrayD<f32>, depth: usize) -> Result<Array3<f32>> {
    match image.ndim() {
        2 => {
            let planar = image
                .into_dimensionality::<Ix2>()
                .map_err(|e| ImagingError::ShapeMismatch(e.to_string()))?;
            let (h, w) = planar.dim();
            planar
                .broadcast((depth, h, w))
                .map(|view| view.to_owned())
                .ok_or_else(|| {
                    ImagingError::ShapeMismatch(format!("cannot tile {h}x{w} image to depth {depth}"))
                })
        }
        3 => {
            let volume = image
                .into_dimensionality::<Ix3>()
                .map_err(|e| ImagingError::ShapeMismatch(e.to_string()))?;
            let (h, w, d) = volume.dim();
            if d != depth {
                return Err(ImagingError::ShapeMismatch(format!(
                    "{h}x{w}x{d} image for {depth} field(s)"
                )));
            }
            Ok(volume
                .permuted_axes([2, 0, 1])
                .as_standard_layout()
                .into_owned())
        }
        n => Err(ImagingError::ShapeMismatch(format!(
            "summary image with {n} dimensions"
        ))),
    }
}
