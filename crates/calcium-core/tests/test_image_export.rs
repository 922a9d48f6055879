use ndarray::Array2;
use tempfile::TempDir;

use calcium_core::io::image_export::{save_image, save_png, save_tiff};

fn gradient() -> Array2<f32> {
    Array2::from_shape_fn((8, 12), |(y, x)| (y * 12 + x) as f32 - 20.0)
}

#[test]
fn test_png_is_stretched_to_full_range() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("mean.png");
    save_png(&gradient(), &path).unwrap();

    let img = image::open(&path).unwrap().to_luma8();
    assert_eq!(img.dimensions(), (12, 8));
    assert_eq!(img.get_pixel(0, 0)[0], 0);
    assert_eq!(img.get_pixel(11, 7)[0], 255);
}

#[test]
fn test_tiff_keeps_sixteen_bits() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("mean.tiff");
    save_tiff(&gradient(), &path).unwrap();

    let img = image::open(&path).unwrap().to_luma16();
    assert_eq!(img.dimensions(), (12, 8));
    assert_eq!(img.get_pixel(11, 7)[0], 65535);
}

#[test]
fn test_non_finite_pixels_map_to_black() {
    let tmp = TempDir::new().unwrap();
    let mut data = gradient();
    data[[3, 3]] = f32::NAN;
    let path = tmp.path().join("corr.png");
    save_image(&data, &path).unwrap();

    let img = image::open(&path).unwrap().to_luma8();
    assert_eq!(img.get_pixel(3, 3)[0], 0);
    assert_eq!(img.get_pixel(11, 7)[0], 255);
}

#[test]
fn test_extension_selects_format() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("ref.tif");
    save_image(&gradient(), &path).unwrap();
    assert_eq!(
        image::ImageFormat::from_path(&path).unwrap(),
        image::ImageFormat::Tiff
    );
    assert!(image::open(&path).is_ok());
}
