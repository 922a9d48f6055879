use std::path::Path;

use image::{GrayImage, ImageFormat, Luma};
use ndarray::Array2;

use crate::error::{ImagingError, Result};

/// Min/max over finite pixels; `None` when the image has none.
fn finite_range(image: &Array2<f32>) -> Option<(f32, f32)> {
    image
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Rescale to [0, 1]; non-finite pixels map to 0.
fn normalized(image: &Array2<f32>) -> Array2<f32> {
    let (lo, hi) = finite_range(image).unwrap_or((0.0, 1.0));
    let span = if hi > lo { hi - lo } else { 1.0 };
    image.mapv(|v| if v.is_finite() { (v - lo) / span } else { 0.0 })
}

/// Save a summary image as 16-bit grayscale TIFF, stretched to full range.
pub fn save_tiff(image: &Array2<f32>, path: &Path) -> Result<()> {
    let (h, w) = image.dim();
    let pixels: Vec<u16> = normalized(image)
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 65535.0) as u16)
        .collect();

    let img = image::ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| ImagingError::ShapeMismatch(format!("{h}x{w} image buffer")))?;
    img.save_with_format(path, ImageFormat::Tiff)?;
    Ok(())
}

/// Save a summary image as 8-bit grayscale PNG, stretched to full range.
pub fn save_png(image: &Array2<f32>, path: &Path) -> Result<()> {
    let (h, w) = image.dim();
    let data = normalized(image);

    let mut img = GrayImage::new(w as u32, h as u32);
    for ((row, col), v) in data.indexed_iter() {
        img.put_pixel(col as u32, row as u32, Luma([(v.clamp(0.0, 1.0) * 255.0) as u8]));
    }

    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save a summary image, choosing format from file extension.
pub fn save_image(image: &Array2<f32>, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => save_png(image, path),
        _ => save_tiff(image, path),
    }
}
