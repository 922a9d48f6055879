use std::collections::HashMap;

use ndarray::Array2;
use tracing::info;

use crate::error::{ImagingError, Result};
use crate::keys::{ActivityKey, CurationKey};
use crate::loader::{PlaneActivity, PlaneTraces};
use crate::records::{ActivityRecord, ActivityTrace, FluorescenceRecord, SegmentationRecord, Trace};

/// `(plane, index within plane)` -> global mask id.
struct MaskIndex {
    ids: HashMap<(usize, usize), u32>,
    per_plane: HashMap<usize, usize>,
}

impl MaskIndex {
    fn new(segmentation: &SegmentationRecord) -> Self {
        let mut ids = HashMap::new();
        let mut per_plane = HashMap::new();
        for mask in &segmentation.masks {
            ids.insert((mask.plane, mask.plane_mask_index), mask.mask_id);
            *per_plane.entry(mask.plane).or_insert(0) += 1;
        }
        Self { ids, per_plane }
    }

    /// Global ids for the rows of a plane's `(masks, frames)` array.
    fn rows(&self, plane: usize, series: &Array2<f32>, what: &str) -> Result<Vec<u32>> {
        let expected = self.per_plane.get(&plane).copied().unwrap_or(0);
        if series.nrows() != expected {
            return Err(ImagingError::ShapeMismatch(format!(
                "plane {plane} has {expected} masks but {} {what} rows",
                series.nrows()
            )));
        }
        (0..expected)
            .map(|row| {
                self.ids.get(&(plane, row)).copied().ok_or_else(|| {
                    ImagingError::ShapeMismatch(format!("plane {plane} has no mask {row}"))
                })
            })
            .collect()
    }
}

fn channel_of(channel: u32, follows_segmentation: bool, segmentation_channel: u32) -> u32 {
    if follows_segmentation {
        segmentation_channel
    } else {
        channel
    }
}

/// Attach fluorescence (and neuropil) series to the global mask ids.
pub fn normalize_fluorescence(
    key: &CurationKey,
    segmentation: &SegmentationRecord,
    planes: Vec<PlaneTraces>,
    segmentation_channel: u32,
) -> Result<FluorescenceRecord> {
    let index = MaskIndex::new(segmentation);
    let mut traces = Vec::new();

    for plane in planes {
        for channel in plane.channels {
            let ids = index.rows(plane.plane, &channel.fluorescence, "fluorescence")?;
            if let Some(neuropil) = &channel.neuropil {
                if neuropil.dim() != channel.fluorescence.dim() {
                    return Err(ImagingError::ShapeMismatch(format!(
                        "plane {} neuropil {:?} vs fluorescence {:?}",
                        plane.plane,
                        neuropil.dim(),
                        channel.fluorescence.dim()
                    )));
                }
            }
            let ch = channel_of(
                channel.channel,
                channel.follows_segmentation,
                segmentation_channel,
            );
            for (row, mask_id) in ids.into_iter().enumerate() {
                traces.push(Trace {
                    mask_id,
                    channel: ch,
                    fluorescence: channel.fluorescence.row(row).to_owned(),
                    neuropil: channel.neuropil.as_ref().map(|n| n.row(row).to_owned()),
                });
            }
        }
    }
    traces.sort_by_key(|t| (t.channel, t.mask_id));

    info!(key = %key, traces = traces.len(), "Normalized fluorescence");
    Ok(FluorescenceRecord {
        key: key.clone(),
        traces,
    })
}

/// Attach derived activity series to the global mask ids.
pub fn normalize_activity(
    key: &ActivityKey,
    segmentation: &SegmentationRecord,
    planes: Vec<PlaneActivity>,
    segmentation_channel: u32,
) -> Result<ActivityRecord> {
    let index = MaskIndex::new(segmentation);
    let mut traces = Vec::new();

    for plane in planes {
        let ids = index.rows(plane.plane, &plane.activity, "activity")?;
        let channel = channel_of(plane.channel, plane.follows_segmentation, segmentation_channel);
        for (row, mask_id) in ids.into_iter().enumerate() {
            traces.push(ActivityTrace {
                mask_id,
                channel,
                activity: plane.activity.row(row).to_owned(),
            });
        }
    }
    traces.sort_by_key(|t| (t.channel, t.mask_id));

    info!(key = %key, traces = traces.len(), "Normalized activity");
    Ok(ActivityRecord {
        key: key.clone(),
        traces,
    })
}
