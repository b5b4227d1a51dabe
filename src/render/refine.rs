use image::{imageops, imageops::FilterType, GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use ndarray::ArrayView2;

use crate::preprocess::target_dimensions;

pub fn to_gray(mask: ArrayView2<bool>) -> GrayImage {
    let (height, width) = mask.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([if mask[[y as usize, x as usize]] { 255 } else { 0 }])
    })
}

/// Closes pinholes (3x3), then opens away specks and spurs (Chebyshev radius 4).
pub fn smooth(mask: &GrayImage) -> GrayImage {
    let closed = morphology::close(mask, Norm::LInf, 1);
    morphology::open(&closed, Norm::LInf, 4)
}

/// Nearest-neighbour round trip through a mask whose longest side is `low_res`.
///
/// Masks already at or below that size are returned as is.
pub fn coarsen(mask: &GrayImage, low_res: u32) -> GrayImage {
    let (width, height) = mask.dimensions();
    if width.max(height) <= low_res {
        return mask.clone();
    }

    let (low_width, low_height) = target_dimensions(width, height, low_res);
    let small = imageops::resize(mask, low_width, low_height, FilterType::Nearest);
    imageops::resize(&small, width, height, FilterType::Nearest)
}

pub fn area(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] > 0).count()
}
