use image::{GrayImage, Rgb, RgbImage};
use rayon::prelude::*;

use super::refine::area;

#[inline]
fn blend_pixel(pixel: &mut [u8], color: Rgb<u8>, alpha: f32) {
    for (channel, &c) in pixel.iter_mut().zip(color.0.iter()) {
        *channel = (c as f32 * alpha + *channel as f32 * (1.0 - alpha)).round() as u8;
    }
}

/// Index of the smallest mask covering each pixel, row-major.
///
/// Equal areas go to the mask that came first.
fn owner_map(masks: &[GrayImage], pixel_count: usize) -> Vec<Option<usize>> {
    let areas: Vec<usize> = masks.par_iter().map(area).collect();
    let mut order: Vec<usize> = (0..masks.len()).collect();
    // largest first, so smaller masks overwrite
    order.sort_by(|&a, &b| areas[b].cmp(&areas[a]).then(b.cmp(&a)));

    let mut owners = vec![None; pixel_count];
    for index in order {
        for (owner, pixel) in owners.iter_mut().zip(masks[index].pixels()) {
            if pixel[0] > 0 {
                *owner = Some(index);
            }
        }
    }
    owners
}

/// Fills every covered pixel with the color of the smallest covering mask.
pub fn composite(canvas: &mut RgbImage, masks: &[GrayImage], colors: &[Rgb<u8>], alpha: f32) {
    let pixel_count = canvas.width() as usize * canvas.height() as usize;
    let owners = owner_map(masks, pixel_count);

    (&mut **canvas)
        .par_chunks_mut(3)
        .zip(owners.par_iter())
        .for_each(|(pixel, owner)| {
            if let Some(index) = *owner {
                blend_pixel(pixel, colors[index], alpha);
            }
        });
}

/// Blends `color` wherever `layer` is set.
pub fn blend_layer(canvas: &mut RgbImage, layer: &GrayImage, color: Rgb<u8>, alpha: f32) {
    (&mut **canvas)
        .par_chunks_mut(3)
        .zip(layer.as_raw().par_iter())
        .for_each(|(pixel, &coverage)| {
            if coverage > 0 {
                blend_pixel(pixel, color, alpha);
            }
        });
}
