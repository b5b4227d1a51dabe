use crate::errors::{MobileSamError, Result};
use image::{imageops, imageops::FilterType, GenericImageView, RgbImage};
use tracing::debug;

/// Decodes uploaded bytes into RGB and resizes the larger side to `input_size`.
pub fn load_image(bytes: &[u8], input_size: u32) -> Result<RgbImage> {
    let image = decode_rgb(bytes)?;
    let resized = resize_longest_side(&image, input_size);
    debug!(
        "Preprocessed upload: {}x{} -> {}x{}",
        image.width(),
        image.height(),
        resized.width(),
        resized.height()
    );
    Ok(resized)
}

/// Decodes any supported encoding into an RGB buffer.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(MobileSamError::EmptyImage {
            width: 0,
            height: 0,
        });
    }

    let image = image::load_from_memory(bytes).map_err(|e| MobileSamError::Decode { source: e })?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(MobileSamError::EmptyImage { width, height });
    }

    Ok(image.into_rgb8())
}

/// Target dimensions with the larger side equal to `size` and the other scaled by
/// `size / max(width, height)`, rounded, at least 1.
pub fn target_dimensions(width: u32, height: u32, size: u32) -> (u32, u32) {
    let longest = width.max(height);
    let scale = size as f64 / longest as f64;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).max(1);

    if width >= height {
        (size, scaled(height))
    } else {
        (scaled(width), size)
    }
}

pub fn resize_longest_side(image: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = target_dimensions(width, height, size);

    if (new_width, new_height) == (width, height) {
        return image.clone();
    }

    imageops::resize(image, new_width, new_height, FilterType::CatmullRom)
}
