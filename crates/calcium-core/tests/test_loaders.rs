#[allow(dead_code)]
mod common;

use tempfile::TempDir;

use calcium_core::error::ImagingError;
use calcium_core::loader::caiman::CaimanResult;
use calcium_core::loader::extract::ExtractResult;
use calcium_core::loader::suite2p::Suite2pResult;
use calcium_core::loader::{open_result, LoadedResult, LoaderRegistry};
use calcium_core::params::{ExtractionMethod, ProcessingMethod};

use common::{CaimanSpec, PlaneSpec};

fn missing_members(err: ImagingError) -> Vec<String> {
    match err {
        ImagingError::BackendFileMissing { missing, .. } => missing,
        other => panic!("expected BackendFileMissing, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[test]
fn test_unknown_backend_is_unsupported() {
    let tmp = TempDir::new().unwrap();
    assert!(matches!(
        open_result(tmp.path(), "deepcad"),
        Err(ImagingError::UnsupportedBackend(name)) if name == "deepcad"
    ));
}

#[test]
fn test_registry_without_loader_is_unsupported() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(2, 1)]);
    let registry = LoaderRegistry::empty();
    assert!(registry.methods().is_empty());
    assert!(matches!(
        registry.open_method(tmp.path(), ProcessingMethod::Suite2p),
        Err(ImagingError::UnsupportedBackend(_))
    ));
}

#[test]
fn test_backend_names_are_case_insensitive() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(2, 1)]);
    let result = open_result(tmp.path(), "Suite2P").unwrap();
    assert_eq!(result.method(), ProcessingMethod::Suite2p);
}

#[test]
fn test_missing_directory_is_backend_file_missing() {
    let tmp = TempDir::new().unwrap();
    let err = open_result(&tmp.path().join("absent"), "caiman").err().unwrap();
    assert!(err.is_retryable());
    assert!(matches!(err, ImagingError::BackendFileMissing { .. }));
}

// ---------------------------------------------------------------------------
// Suite2p
// ---------------------------------------------------------------------------

#[test]
fn test_suite2p_without_classifier_output() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(3, 1)]);
    std::fs::remove_file(tmp.path().join("plane0/iscell.npy")).unwrap();

    let err = Suite2pResult::open(tmp.path()).err().unwrap();
    assert_eq!(missing_members(err), vec!["iscell.npy".to_string()]);

    // Registration-only runs never write it.
    let registration = Suite2pResult::open_registration(tmp.path()).unwrap();
    assert_eq!(registration.plane_indices(), vec![0]);
}

#[test]
fn test_suite2p_without_planes() {
    let tmp = TempDir::new().unwrap();
    let err = Suite2pResult::open(tmp.path()).err().unwrap();
    assert_eq!(missing_members(err), vec!["plane*/ops.json".to_string()]);
}

#[test]
fn test_suite2p_skips_combined_view() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(2, 1), PlaneSpec::new(1, 0)]);
    let combined = tmp.path().join("combined");
    std::fs::create_dir_all(&combined).unwrap();
    std::fs::copy(tmp.path().join("plane0/ops.json"), combined.join("ops.json")).unwrap();

    let result = Suite2pResult::open(tmp.path()).unwrap();
    assert_eq!(result.plane_indices(), vec![0, 1]);
}

#[test]
fn test_suite2p_rejects_unexpected_plane_dir() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(2, 1)]);
    std::fs::rename(tmp.path().join("plane0"), tmp.path().join("stack")).unwrap();
    assert!(matches!(
        Suite2pResult::open(tmp.path()),
        Err(ImagingError::InvalidLayout(_))
    ));
}

#[test]
fn test_suite2p_ops_are_read_once() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(2, 1)]);
    let result = Suite2pResult::open(tmp.path()).unwrap();
    let plane = result.plane(0).unwrap();

    assert!(!plane.ops_loaded());
    assert_eq!(plane.ops_load_count(), 0);

    assert_eq!(result.alignment_channel().unwrap(), 0);
    assert_eq!(result.segmentation_channel().unwrap(), 0);
    plane.ops().unwrap();

    assert!(plane.ops_loaded());
    assert_eq!(plane.ops_load_count(), 1);
}

#[test]
fn test_suite2p_arrays_outlive_their_files() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(2, 1)]);
    let result = Suite2pResult::open(tmp.path()).unwrap();

    let traces = result.fluorescence().unwrap();
    let masks = result.masks().unwrap();
    let spikes = result.activity(ExtractionMethod::Suite2pDeconvolution).unwrap();
    for name in ["F.npy", "Fneu.npy", "spks.npy", "stat.json", "iscell.npy"] {
        std::fs::remove_file(tmp.path().join("plane0").join(name)).unwrap();
    }

    let again = result.fluorescence().unwrap();
    assert_eq!(again[0].channels.len(), 1);
    assert_eq!(again[0].channels[0].fluorescence, traces[0].channels[0].fluorescence);
    assert_eq!(again[0].channels[0].neuropil, traces[0].channels[0].neuropil);
    assert_eq!(result.masks().unwrap()[0].masks.len(), masks[0].masks.len());
    let spikes_again = result.activity(ExtractionMethod::Suite2pDeconvolution).unwrap();
    assert_eq!(spikes_again[0].activity, spikes[0].activity);
    assert_eq!(result.plane(0).unwrap().traces_load_count(), 1);
}

#[test]
fn test_suite2p_masks_and_verdicts() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(4, 2), PlaneSpec::new(3, 0)]);
    let result = Suite2pResult::open(tmp.path()).unwrap();

    let planes = result.masks().unwrap();
    assert_eq!(planes.len(), 2);
    assert_eq!(planes[1].plane, 1);

    let first = &planes[0].masks;
    assert_eq!(first.len(), 4);
    assert_eq!(first[2].ypix, vec![2, 2, 3]);
    assert_eq!(first[2].center_y, 2);
    assert_eq!(first[2].pixel_count, 3);
    let verdicts: Vec<Option<bool>> = first.iter().map(|m| m.is_cell).collect();
    assert_eq!(verdicts, vec![Some(true), Some(true), Some(false), Some(false)]);
    assert_eq!(first[0].confidence, Some(0.9));
    assert!(planes[1].masks.iter().all(|m| m.is_cell == Some(false)));
}

#[test]
fn test_suite2p_iscell_row_mismatch() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("plane0");
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(3, 1)]);
    // Stats for two ROIs against a classifier output for three.
    let stat = serde_json::json!([
        {"ypix": [0], "xpix": [0], "lam": [1.0], "med": [0.0, 0.0]},
        {"ypix": [1], "xpix": [1], "lam": [1.0], "med": [1.0, 1.0]},
    ]);
    std::fs::write(dir.join("stat.json"), stat.to_string()).unwrap();

    let result = Suite2pResult::open(tmp.path()).unwrap();
    assert!(matches!(result.masks(), Err(ImagingError::ShapeMismatch(_))));
}

#[test]
fn test_suite2p_traces_and_spikes() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(tmp.path(), &[PlaneSpec::new(3, 1)]);
    let result = Suite2pResult::open(tmp.path()).unwrap();

    let traces = result.fluorescence().unwrap();
    let channel = &traces[0].channels[0];
    assert_eq!(channel.channel, 0);
    assert!(!channel.follows_segmentation);
    assert_eq!(channel.fluorescence, common::series(3, 20, 10));
    assert_eq!(channel.neuropil.as_ref().unwrap(), &common::series(3, 20, 20));

    let spikes = result.activity(ExtractionMethod::Suite2pDeconvolution).unwrap();
    assert_eq!(spikes[0].activity, common::series(3, 20, 30));
    assert!(matches!(
        result.activity(ExtractionMethod::CaimanDff),
        Err(ImagingError::InvalidConfig(_))
    ));
}

// ---------------------------------------------------------------------------
// CaImAn
// ---------------------------------------------------------------------------

#[test]
fn test_caiman_lists_missing_members() {
    let tmp = TempDir::new().unwrap();
    let skip = ["estimates/A/indptr", "motion_correction/max_image"];
    common::write_caiman_archive(&tmp.path().join("run.npz"), &CaimanSpec::planar(3), &skip);

    let mut missing = missing_members(CaimanResult::open(tmp.path()).err().unwrap());
    missing.sort();
    assert_eq!(missing, vec!["estimates/A/indptr", "motion_correction/max_image"]);
}

#[test]
fn test_caiman_without_archive() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("notes.txt"), "not an archive").unwrap();
    let missing = missing_members(CaimanResult::open(tmp.path()).err().unwrap());
    assert_eq!(missing.len(), 8);
}

#[test]
fn test_caiman_picks_complete_archive() {
    let tmp = TempDir::new().unwrap();
    common::write_caiman_archive(
        &tmp.path().join("a_partial.npz"),
        &CaimanSpec::planar(2),
        &["estimates/A/data"],
    );
    common::write_caiman_archive(&tmp.path().join("b_full.npz"), &CaimanSpec::planar(2), &[]);

    let result = CaimanResult::open(tmp.path()).unwrap();
    assert!(result.archive().path().ends_with("b_full.npz"));
}

#[test]
fn test_caiman_params_are_lazy() {
    let tmp = TempDir::new().unwrap();
    common::write_caiman_archive(&tmp.path().join("run.npz"), &CaimanSpec::planar(3), &[]);
    let result = CaimanResult::open(tmp.path()).unwrap();

    assert!(!result.params_loaded());
    let params = result.motion_params().unwrap();
    assert!(!params.is_3d);
    assert_eq!(params.strides, vec![4, 4, 1]);
    assert!(result.params_loaded());
}

#[test]
fn test_caiman_masks_from_sparse_footprints() {
    let tmp = TempDir::new().unwrap();
    common::write_caiman_archive(&tmp.path().join("run.npz"), &CaimanSpec::planar(3), &[]);
    let result = CaimanResult::open(tmp.path()).unwrap();

    let planes = result.masks().unwrap();
    assert_eq!(planes.len(), 1);
    let masks = &planes[0].masks;
    assert_eq!(masks.len(), 3);

    assert_eq!(masks[1].xpix, vec![1, 2, 3]);
    assert_eq!(masks[1].ypix, vec![1, 1, 1]);
    assert_eq!(masks[1].weights, vec![1.0, 1.0, 2.0]);
    assert!(masks[1].zpix.is_none());
    // (1 + 2 + 2 * 3) / 4 truncated.
    assert_eq!(masks[1].center_x, 2);
    assert_eq!(masks[1].center_y, 1);

    let verdicts: Vec<Option<bool>> = masks.iter().map(|m| m.is_cell).collect();
    assert_eq!(verdicts, vec![Some(true), Some(false), Some(true)]);
    assert_eq!(result.segmentation_channel().unwrap(), 0);
}

#[test]
fn test_caiman_traces_and_activity() {
    let tmp = TempDir::new().unwrap();
    common::write_caiman_archive(&tmp.path().join("run.npz"), &CaimanSpec::planar(3), &[]);
    let result = CaimanResult::open(tmp.path()).unwrap();

    let traces = result.fluorescence().unwrap();
    assert_eq!(traces[0].channels[0].fluorescence, common::series(3, 20, 6));
    assert!(traces[0].channels[0].neuropil.is_none());

    let dff = result.activity(ExtractionMethod::CaimanDff).unwrap();
    assert_eq!(dff[0].activity, common::series(3, 20, 8));
    let spikes = result.activity(ExtractionMethod::CaimanDeconvolution).unwrap();
    assert_eq!(spikes[0].activity, common::series(3, 20, 7));
}

#[test]
fn test_caiman_arrays_are_read_once() {
    let tmp = TempDir::new().unwrap();
    common::write_caiman_archive(&tmp.path().join("run.npz"), &CaimanSpec::planar(3), &[]);
    let result = CaimanResult::open(tmp.path()).unwrap();
    assert_eq!(result.array_load_count(), 0);

    for _ in 0..3 {
        result.motion().unwrap();
        result.summary_images().unwrap();
        result.fluorescence().unwrap();
        result.activity(ExtractionMethod::CaimanDff).unwrap();
        result.activity(ExtractionMethod::CaimanDeconvolution).unwrap();
    }
    assert_eq!(result.array_load_count(), 5);
}

// ---------------------------------------------------------------------------
// EXTRACT
// ---------------------------------------------------------------------------

#[test]
fn test_extract_without_weights_archive() {
    let tmp = TempDir::new().unwrap();
    common::write_suite2p_output(&tmp.path().join("suite2p"), &[PlaneSpec::new(0, 0)]);
    let err = ExtractResult::open(tmp.path()).err().unwrap();
    assert_eq!(missing_members(err), vec!["extract_output.npz".to_string()]);
}

#[test]
fn test_extract_masks_from_dense_weights() {
    let tmp = TempDir::new().unwrap();
    common::write_extract_output(tmp.path(), 20, 3);
    let result = ExtractResult::open(tmp.path()).unwrap();

    assert_eq!(result.plane_indices(), vec![0]);
    assert_eq!(result.segmentation_channel().unwrap(), 0);
    assert!(result.creation_time() <= result.curation_time());

    let masks = &result.masks().unwrap()[0].masks;
    assert_eq!(masks.len(), 3);
    for (k, mask) in masks.iter().enumerate() {
        assert_eq!(mask.pixel_count, 8);
        assert!(mask.ypix.iter().all(|&y| y / 4 == k as i64));
        assert_eq!(mask.center_y, 4 * k as i64 + 2);
        assert_eq!(mask.center_x, 1);
        assert!(mask.is_cell.is_none());
    }
}

#[test]
fn test_extract_traces_are_transposed() {
    let tmp = TempDir::new().unwrap();
    common::write_extract_output(tmp.path(), 20, 2);
    let result = ExtractResult::open(tmp.path()).unwrap();

    let traces = result.fluorescence().unwrap();
    let fluorescence = &traces[0].channels[0].fluorescence;
    assert_eq!(fluorescence.dim(), (2, 20));
    assert_eq!(fluorescence.t(), common::series(20, 2, 9));
    assert!(matches!(
        result.activity(ExtractionMethod::Suite2pDeconvolution),
        Err(ImagingError::InvalidConfig(_))
    ));
}

#[test]
fn test_extract_traces_are_read_once() {
    let tmp = TempDir::new().unwrap();
    common::write_extract_output(tmp.path(), 20, 2);
    let result = ExtractResult::open(tmp.path()).unwrap();

    let first = result.fluorescence().unwrap();
    let second = result.fluorescence().unwrap();
    assert_eq!(first[0].channels[0].fluorescence, second[0].channels[0].fluorescence);
    assert_eq!(result.traces_load_count(), 1);
}

#[test]
fn test_extract_motion_comes_from_registration() {
    let tmp = TempDir::new().unwrap();
    common::write_extract_output(tmp.path(), 20, 1);
    let result = ExtractResult::open(tmp.path()).unwrap();
    assert_eq!(result.registration().plane_indices(), vec![0]);
    assert!(result.motion().is_ok());
    assert!(result.summary_images().is_ok());
}
