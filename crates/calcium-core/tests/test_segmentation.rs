#[allow(dead_code)]
mod common;

use std::collections::BTreeSet;

use serde_json::json;
use tempfile::TempDir;

use calcium_core::error::ImagingError;
use calcium_core::keys::{CurationKey, TaskKey};
use calcium_core::loader::suite2p::Suite2pResult;
use calcium_core::loader::{LoadedMask, PlaneMasks};
use calcium_core::normalize::{normalize_segmentation, resolve_segmentation_channel};
use calcium_core::params::{ParameterSet, ProcessingMethod};
use calcium_core::records::MaskType;

use common::PlaneSpec;

fn key() -> CurationKey {
    CurationKey::new(TaskKey::new(common::scan_key(), 0), 0)
}

fn masks(plane: usize, count: usize, cells: &[usize]) -> PlaneMasks {
    PlaneMasks {
        plane,
        masks: (0..count)
            .map(|i| LoadedMask {
                xpix: vec![i as i64, i as i64 + 1],
                ypix: vec![plane as i64; 2],
                weights: vec![1.0, 0.5],
                pixel_count: 2,
                center_x: i as i64,
                center_y: plane as i64,
                is_cell: Some(cells.contains(&i)),
                confidence: Some(if cells.contains(&i) { 0.8 } else { 0.2 }),
                ..LoadedMask::default()
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Numbering
// ---------------------------------------------------------------------------

#[test]
fn test_ids_are_contiguous_across_planes() {
    let planes = vec![masks(0, 4, &[]), masks(1, 0, &[]), masks(2, 3, &[]), masks(3, 5, &[])];
    let record = normalize_segmentation(&key(), &planes, 0, None).unwrap();

    let ids: Vec<u32> = record.masks.iter().map(|m| m.mask_id).collect();
    assert_eq!(ids, (0..12).collect::<Vec<u32>>());

    let plane2: Vec<u32> = record.masks_in_plane(2).map(|m| m.mask_id).collect();
    assert_eq!(plane2, vec![4, 5, 6]);
    assert!(plane2.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_numbering_follows_plane_order_not_input_order() {
    let shuffled = vec![masks(2, 2, &[]), masks(0, 3, &[]), masks(1, 1, &[])];
    let ordered = vec![masks(0, 3, &[]), masks(1, 1, &[]), masks(2, 2, &[])];

    let a = normalize_segmentation(&key(), &shuffled, 0, None).unwrap();
    let b = normalize_segmentation(&key(), &ordered, 0, None).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.mask(3).unwrap().plane, 1);
    assert_eq!(a.mask(4).unwrap().plane_mask_index, 0);
}

#[test]
fn test_duplicate_plane_is_rejected() {
    let planes = vec![masks(1, 2, &[]), masks(1, 2, &[])];
    assert!(matches!(
        normalize_segmentation(&key(), &planes, 0, None),
        Err(ImagingError::InvalidLayout(_))
    ));
}

#[test]
fn test_center_z_defaults_to_plane() {
    let mut planes = vec![masks(0, 1, &[]), masks(3, 2, &[])];
    planes[1].masks[1].center_z = Some(7);
    let record = normalize_segmentation(&key(), &planes, 1, None).unwrap();

    assert_eq!(record.masks[0].center_z, 0);
    assert_eq!(record.masks[1].center_z, 3);
    assert_eq!(record.masks[1].zpix, vec![3, 3]);
    assert_eq!(record.masks[2].center_z, 7);
    assert!(record.masks.iter().all(|m| m.segmentation_channel == 1));
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[test]
fn test_classification_is_subset_of_cells() {
    let planes = vec![masks(0, 5, &[1, 4]), masks(1, 3, &[0])];
    let record = normalize_segmentation(&key(), &planes, 0, Some("suite2p_default_classifier"))
        .unwrap();

    let classification = record.classification.as_ref().unwrap();
    assert_eq!(classification.method, "suite2p_default_classifier");
    let ids: BTreeSet<u32> = classification.entries.iter().map(|c| c.mask_id).collect();
    assert_eq!(ids, BTreeSet::from([1, 4, 5]));
    assert!(classification.entries.iter().all(|c| c.mask_type == MaskType::Soma));
    assert_eq!(record.classification_of(5).unwrap().confidence, Some(0.8));
    assert!(record.classification_of(0).is_none());
}

#[test]
fn test_no_classifier_means_no_classification() {
    let planes = vec![masks(0, 3, &[0, 1, 2])];
    let record = normalize_segmentation(&key(), &planes, 0, None).unwrap();
    assert!(record.classification.is_none());

    let mut unjudged = masks(0, 2, &[]);
    for mask in &mut unjudged.masks {
        mask.is_cell = None;
    }
    let record = normalize_segmentation(&key(), &[unjudged], 0, Some("caiman_default_classifier"))
        .unwrap();
    assert!(record.classification.is_none());
}

// ---------------------------------------------------------------------------
// Segmentation channel
// ---------------------------------------------------------------------------

#[test]
fn test_parameter_override_wins_over_loader_channel() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(1, 1)]);
    let result = Suite2pResult::open(tmp.path()).unwrap();

    let plain = ParameterSet::new(ProcessingMethod::Suite2p, 0, "", &json!({}));
    assert_eq!(resolve_segmentation_channel(&plain, &result).unwrap(), 0);

    let pinned = ParameterSet::new(
        ProcessingMethod::Suite2p,
        1,
        "",
        &json!({"segmentation_channel": 1}),
    );
    assert_eq!(resolve_segmentation_channel(&pinned, &result).unwrap(), 1);
}
