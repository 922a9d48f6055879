use tracing::info;

use crate::error::{ImagingError, Result};
use crate::keys::CurationKey;
use crate::loader::{LoadedResult, PlaneMasks};
use crate::params::ParameterSet;
use crate::records::{ClassifiedMask, Mask, MaskClassification, MaskType, SegmentationRecord};

/// Channel the masks were segmented on: the parameter override when set,
/// otherwise what the loader reports.
pub fn resolve_segmentation_channel(
    params: &ParameterSet,
    result: &dyn LoadedResult,
) -> Result<u32> {
    match params.segmentation_channel()? {
        Some(channel) => Ok(channel),
        None => result.segmentation_channel(),
    }
}

/// Number masks globally: ascending plane, then the loader's order within
/// each plane, from 0 without gaps.
///
/// Only masks the loader flags as cells are classified, and only when
/// `classifier` names the method and the loader reported any verdicts.
pub fn normalize_segmentation(
    key: &CurationKey,
    planes: &[PlaneMasks],
    segmentation_channel: u32,
    classifier: Option<&str>,
) -> Result<SegmentationRecord> {
    let mut ordered: Vec<&PlaneMasks> = planes.iter().collect();
    ordered.sort_by_key(|p| p.plane);
    if let Some(pair) = ordered.windows(2).find(|w| w[0].plane == w[1].plane) {
        return Err(ImagingError::InvalidLayout(format!(
            "plane {} reported twice",
            pair[0].plane
        )));
    }

    let mut masks = Vec::new();
    let mut classified = Vec::new();
    let mut counter: u32 = 0;
    let mut has_verdicts = false;
    for plane in ordered {
        for (plane_mask_index, loaded) in plane.masks.iter().enumerate() {
            let mask_id = counter;
            counter += 1;

            let center_z = loaded.center_z.unwrap_or(plane.plane as i64);
            let zpix = loaded
                .zpix
                .clone()
                .unwrap_or_else(|| vec![center_z; loaded.xpix.len()]);
            masks.push(Mask {
                mask_id,
                plane: plane.plane,
                plane_mask_index,
                segmentation_channel,
                pixel_count: loaded.pixel_count,
                center_x: loaded.center_x,
                center_y: loaded.center_y,
                center_z,
                xpix: loaded.xpix.clone(),
                ypix: loaded.ypix.clone(),
                zpix,
                weights: loaded.weights.clone(),
            });

            has_verdicts |= loaded.is_cell.is_some();
            if loaded.is_cell == Some(true) {
                classified.push(ClassifiedMask {
                    mask_id,
                    mask_type: MaskType::Soma,
                    confidence: loaded.confidence,
                });
            }
        }
    }

    let classification = classifier
        .filter(|_| has_verdicts)
        .map(|method| MaskClassification {
            method: method.to_string(),
            entries: classified,
        });

    info!(
        key = %key,
        masks = masks.len(),
        cells = classification.as_ref().map_or(0, |c| c.entries.len()),
        "Normalized segmentation"
    );

    Ok(SegmentationRecord {
        key: key.clone(),
        masks,
        classification,
    })
}
