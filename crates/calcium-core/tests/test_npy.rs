use approx::assert_abs_diff_eq;
use ndarray::{array, Array2, Ix1, Ix2};
use tempfile::TempDir;

use calcium_core::error::ImagingError;
use calcium_core::io::archive::{ArchiveWriter, ResultArchive};
use calcium_core::io::npy::{decode_npy, read_npy, NpyFile};
use calcium_core::io::npy_writer::write_npy;

/// Hand-built version 1.0 array image.
fn raw_npy(descr: &str, fortran: bool, shape: &[usize], data: &[u8]) -> Vec<u8> {
    let shape_text = match shape {
        [single] => format!("({single},)"),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '{descr}', 'fortran_order': {}, 'shape': {shape_text}, }}",
        if fortran { "True" } else { "False" }
    );
    let unpadded = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = b"\x93NUMPY\x01\x00".to_vec();
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out
}

// ---------------------------------------------------------------------------
// Header parsing
// ---------------------------------------------------------------------------

#[test]
fn test_written_matrix_reads_back() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("m.npy");
    let matrix = Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as f32 * 0.25);
    write_npy(&path, &matrix).unwrap();

    let file = NpyFile::open(&path).unwrap();
    assert_eq!(file.shape(), &[3, 4]);
    assert_eq!(file.header.data_offset % 64, 0);

    let back: Array2<f32> = read_npy::<f32, Ix2>(&path).unwrap();
    assert_eq!(back, matrix);
}

#[test]
fn test_fortran_order_is_respected() {
    // Column-major storage of [[1, 2, 3], [4, 5, 6]].
    let data: Vec<u8> = [1.0f64, 4.0, 2.0, 5.0, 3.0, 6.0]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    let bytes = raw_npy("<f8", true, &[2, 3], &data);

    let array = decode_npy::<f64>(&bytes).unwrap();
    assert_eq!(array.shape(), &[2, 3]);
    assert_eq!(array[[0, 1]], 2.0);
    assert_eq!(array[[1, 0]], 4.0);
    assert_eq!(array[[1, 2]], 6.0);
}

#[test]
fn test_big_endian_integers() {
    let data: Vec<u8> = [1u16, 256, 65535].iter().flat_map(|v| v.to_be_bytes()).collect();
    let bytes = raw_npy(">u2", false, &[3], &data);

    let array = decode_npy::<u32>(&bytes).unwrap();
    assert_eq!(array.iter().copied().collect::<Vec<_>>(), vec![1, 256, 65535]);
}

#[test]
fn test_dtype_conversion_on_read() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("f64.npy");
    write_npy(&path, &array![0.5f64, -1.25, 3.0]).unwrap();

    let values = read_npy::<f32, Ix1>(&path).unwrap();
    assert_abs_diff_eq!(values[1], -1.25f32, epsilon = 1e-6);
}

#[test]
fn test_bool_arrays() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.npy");
    write_npy(&path, &array![true, false, true]).unwrap();
    let values = read_npy::<bool, Ix1>(&path).unwrap();
    assert_eq!(values, array![true, false, true]);
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[test]
fn test_object_arrays_are_rejected() {
    let bytes = raw_npy("|O", false, &[1], &[0u8; 8]);
    let err = decode_npy::<f32>(&bytes).unwrap_err();
    assert!(matches!(err, ImagingError::InvalidArray(ref msg) if msg.contains("object")));
}

#[test]
fn test_truncated_file_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("short.npy");
    let bytes = raw_npy("<f4", false, &[10], &[0u8; 12]);
    std::fs::write(&path, bytes).unwrap();

    let err = NpyFile::open(&path).err().unwrap();
    assert!(matches!(err, ImagingError::InvalidArray(ref msg) if msg.contains("truncated")));
}

#[test]
fn test_overflowing_shape_is_rejected() {
    let bytes = raw_npy("<f8", false, &[1 << 62, 8], &[0u8; 16]);
    let err = decode_npy::<f64>(&bytes).unwrap_err();
    assert!(matches!(err, ImagingError::InvalidArray(ref msg) if msg.contains("too large")));

    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("huge.npy");
    std::fs::write(&path, &bytes).unwrap();
    let err = NpyFile::open(&path).err().unwrap();
    assert!(matches!(err, ImagingError::InvalidArray(_)));
}

#[test]
fn test_oversized_shape_is_truncated_not_allocated() {
    let bytes = raw_npy("<f4", false, &[1 << 40, 4], &[0u8; 16]);
    let err = decode_npy::<f32>(&bytes).unwrap_err();
    assert!(matches!(err, ImagingError::InvalidArray(ref msg) if msg.contains("truncated")));
}

#[test]
fn test_missing_magic_is_rejected() {
    let err = decode_npy::<f32>(b"not an array file at all").unwrap_err();
    assert!(matches!(err, ImagingError::InvalidArray(_)));
}

#[test]
fn test_wrong_dimensionality_is_a_shape_mismatch() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vec.npy");
    write_npy(&path, &array![1.0f32, 2.0]).unwrap();
    let err = read_npy::<f32, Ix2>(&path).unwrap_err();
    assert!(matches!(err, ImagingError::ShapeMismatch(_)));
}

// ---------------------------------------------------------------------------
// Archives
// ---------------------------------------------------------------------------

#[test]
fn test_archive_groups_and_missing_members() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("run.npz");
    let mut writer = ArchiveWriter::create(&path).unwrap();
    writer
        .add_array("motion_correction/reference_image", &Array2::<f32>::zeros((4, 4)))
        .unwrap();
    writer.add_array("estimates/C", &Array2::<f32>::ones((2, 5))).unwrap();
    writer.finish().unwrap();

    let archive = ResultArchive::open(&path).unwrap();
    let names: Vec<&str> = archive.member_names().collect();
    assert_eq!(names, vec!["estimates/C", "motion_correction/reference_image"]);
    assert!(archive.contains("motion_correction"));
    assert!(archive.contains("estimates/C"));
    assert!(!archive.contains("estimates/S"));

    let missing = archive.missing(&["estimates/C", "estimates/S", "motion_correction/max_image"]);
    assert_eq!(missing, vec!["estimates/S", "motion_correction/max_image"]);

    let traces = archive.read::<f32>("estimates/C").unwrap();
    assert_eq!(traces.shape(), &[2, 5]);
    assert!(archive.read_optional::<f32>("estimates/S").unwrap().is_none());
}
