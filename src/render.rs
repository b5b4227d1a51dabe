//! Overlay rendering: colored mask fills, optional contours, optional bbox and point
//! markers on top of the working image.

mod blend;
mod contour;
pub mod palette;
mod refine;

use image::{GrayImage, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, debug_span};

use crate::device::Device;
use crate::errors::{MobileSamError, Result};
use crate::types::{Annotation, OverlayExtras, SegmentationParams};
use palette::{BBOX_COLOR, CONTOUR_ALPHA, CONTOUR_COLOR, MASK_ALPHA, POINT_COLOR};

/// Longest side of the decoder's native low-resolution masks.
pub const LOW_RES_MASK_SIZE: u32 = 256;

const POINT_RADIUS: u32 = 5;

/// Contour stroke and bbox line width for a given scale.
pub const fn stroke_width(scale: u32) -> u32 {
    let width = 2 / if scale == 0 { 1 } else { scale };
    if width == 0 {
        1
    } else {
        width
    }
}

/// Draws `annotations` over `image`.
///
/// The output only depends on the inputs and on what is drawn from `rng`, so a seeded
/// generator gives reproducible images. `device` is carried for tracing only; all
/// compositing runs on the CPU.
pub fn render<R: Rng + ?Sized>(
    annotations: &[Annotation],
    image: &RgbImage,
    device: Device,
    params: &SegmentationParams,
    extras: &OverlayExtras,
    rng: &mut R,
) -> Result<RgbImage> {
    let _span = debug_span!("render", %device, masks = annotations.len()).entered();

    if annotations.is_empty() && extras.bbox.is_none() && extras.points.is_none() {
        return Ok(image.clone());
    }

    let (width, height) = image.dimensions();
    for (index, annotation) in annotations.iter().enumerate() {
        if (annotation.width(), annotation.height()) != (width, height) {
            return Err(MobileSamError::Render {
                operation: "mask validation".to_string(),
                reason: format!(
                    "mask {} is {}x{} but the image is {}x{}",
                    index,
                    annotation.width(),
                    annotation.height(),
                    width,
                    height
                ),
            });
        }
    }

    let colors = palette::mask_colors(annotations.len(), params.mask_random_color, rng);
    let masks: Vec<GrayImage> = annotations
        .par_iter()
        .map(|annotation| prepare_mask(annotation, params))
        .collect();

    let mut canvas = image.clone();
    blend::composite(&mut canvas, &masks, &colors, MASK_ALPHA);

    let scale = params.scale();
    let line_width = stroke_width(scale);
    if params.with_contours {
        let strokes = masks
            .par_iter()
            .map(|mask| contour::stroke_layer(mask, line_width))
            .reduce_with(contour::merge);
        if let Some(strokes) = strokes {
            blend::blend_layer(&mut canvas, &strokes, CONTOUR_COLOR, CONTOUR_ALPHA);
        }
    }

    draw_extras(&mut canvas, extras, scale);

    debug!(
        "Rendered {} masks (retina: {}, better quality: {}, contours: {})",
        masks.len(),
        params.use_retina,
        params.better_quality,
        params.with_contours
    );
    Ok(canvas)
}

fn prepare_mask(annotation: &Annotation, params: &SegmentationParams) -> GrayImage {
    let mut mask = refine::to_gray(annotation.segmentation.view());
    if params.better_quality {
        mask = refine::smooth(&mask);
    }
    if !params.use_retina {
        mask = refine::coarsen(&mask, LOW_RES_MASK_SIZE);
    }
    mask
}

fn draw_extras(canvas: &mut RgbImage, extras: &OverlayExtras, scale: u32) {
    let (width, height) = canvas.dimensions();

    if let Some(bbox) = extras.bbox {
        let thickness = stroke_width(scale);
        for i in 0..thickness {
            let box_width = bbox.width.saturating_sub(2 * i);
            let box_height = bbox.height.saturating_sub(2 * i);
            if box_width == 0 || box_height == 0 {
                break;
            }
            let rect = Rect::at((bbox.x + i) as i32, (bbox.y + i) as i32)
                .of_size(box_width, box_height);
            draw_hollow_rect_mut(canvas, rect, BBOX_COLOR);
        }
    }

    if let Some(points) = &extras.points {
        let radius = (POINT_RADIUS / scale.max(1)).max(2) as i32;
        for &[x, y] in points {
            if x < 0.0 || y < 0.0 || x >= width as f32 || y >= height as f32 {
                continue;
            }
            draw_filled_circle_mut(canvas, (x.round() as i32, y.round() as i32), radius, POINT_COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use image::Rgb;
    use ndarray::{s, Array2};
    use rand::{rngs::StdRng, SeedableRng};

    fn block_annotation(size: usize, x: usize, y: usize, side: usize) -> Annotation {
        let mut mask = Array2::from_elem((size, size), false);
        mask.slice_mut(s![y..y + side, x..x + side]).fill(true);
        Annotation::from_mask(mask, 0.95, 0.97, [x as f32, y as f32]).unwrap()
    }

    fn flat_params() -> SegmentationParams {
        SegmentationParams {
            with_contours: false,
            mask_random_color: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_stroke_width() {
        assert_eq!(stroke_width(1), 2);
        assert_eq!(stroke_width(2), 1);
        assert_eq!(stroke_width(4), 1);
    }

    #[test]
    fn test_empty_input_returns_base_image() -> Result<()> {
        let image = RgbImage::from_fn(16, 8, |x, y| Rgb([x as u8, y as u8, 7]));
        let mut rng = StdRng::seed_from_u64(1);

        let rendered = render(
            &[],
            &image,
            Device::Cpu,
            &SegmentationParams::default(),
            &OverlayExtras::default(),
            &mut rng,
        )?;
        assert_eq!(rendered, image);
        Ok(())
    }

    #[test]
    fn test_same_seed_same_image() -> Result<()> {
        let image = RgbImage::from_pixel(32, 32, Rgb([40, 40, 40]));
        let annotations = vec![block_annotation(32, 2, 2, 12), block_annotation(32, 16, 10, 10)];
        let params = SegmentationParams::default();
        let extras = OverlayExtras::default();

        let first = render(
            &annotations,
            &image,
            Device::Cpu,
            &params,
            &extras,
            &mut StdRng::seed_from_u64(9),
        )?;
        let second = render(
            &annotations,
            &image,
            Device::Cpu,
            &params,
            &extras,
            &mut StdRng::seed_from_u64(9),
        )?;
        assert_eq!(first, second);
        assert_ne!(first, image);
        Ok(())
    }

    #[test]
    fn test_seed_changes_colors_not_coverage() -> Result<()> {
        let image = RgbImage::from_pixel(32, 32, Rgb([40, 40, 40]));
        let annotations = vec![block_annotation(32, 2, 2, 12), block_annotation(32, 16, 10, 10)];
        let params = SegmentationParams {
            with_contours: false,
            mask_random_color: true,
            ..Default::default()
        };
        let extras = OverlayExtras::default();

        let changed = |rendered: &RgbImage| -> Vec<(u32, u32)> {
            rendered
                .enumerate_pixels()
                .filter(|(x, y, pixel)| *pixel != image.get_pixel(*x, *y))
                .map(|(x, y, _)| (x, y))
                .collect()
        };

        let first = render(
            &annotations,
            &image,
            Device::Cpu,
            &params,
            &extras,
            &mut StdRng::seed_from_u64(1),
        )?;
        let second = render(
            &annotations,
            &image,
            Device::Cpu,
            &params,
            &extras,
            &mut StdRng::seed_from_u64(2),
        )?;

        let covered = changed(&first);
        assert_eq!(covered.len(), 12 * 12 + 10 * 10);
        assert_eq!(covered, changed(&second));
        // 各マスクの内側で色が異なることを確認
        assert_ne!(first.get_pixel(5, 5), second.get_pixel(5, 5));
        assert_ne!(first.get_pixel(20, 15), second.get_pixel(20, 15));
        Ok(())
    }

    #[test]
    fn test_palette_fill() -> Result<()> {
        let image = RgbImage::new(32, 32);
        let annotations = vec![block_annotation(32, 10, 10, 10)];
        let mut rng = StdRng::seed_from_u64(0);

        let rendered = render(
            &annotations,
            &image,
            Device::Cpu,
            &flat_params(),
            &OverlayExtras::default(),
            &mut rng,
        )?;
        assert_eq!(rendered.get_pixel(15, 15), &Rgb([18, 86, 153]));
        assert_eq!(rendered.get_pixel(0, 0), &Rgb([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn test_small_mask_drawn_over_large() -> Result<()> {
        let image = RgbImage::new(32, 32);
        // the large mask comes first but must not hide the small one
        let annotations = vec![block_annotation(32, 0, 0, 32), block_annotation(32, 8, 8, 4)];
        let mut rng = StdRng::seed_from_u64(0);

        let rendered = render(
            &annotations,
            &image,
            Device::Cpu,
            &flat_params(),
            &OverlayExtras::default(),
            &mut rng,
        )?;
        let expected = |c: Rgb<u8>| Rgb(c.0.map(|v| (v as f32 * MASK_ALPHA).round() as u8));
        assert_eq!(rendered.get_pixel(9, 9), &expected(palette::PALETTE[1]));
        assert_eq!(rendered.get_pixel(20, 20), &expected(palette::PALETTE[0]));
        Ok(())
    }

    #[test]
    fn test_contours_drawn_on_border() -> Result<()> {
        let image = RgbImage::new(32, 32);
        let annotations = vec![block_annotation(32, 10, 10, 10)];
        let params = SegmentationParams {
            with_contours: true,
            ..flat_params()
        };
        let mut rng = StdRng::seed_from_u64(0);

        let rendered = render(
            &annotations,
            &image,
            Device::Cpu,
            &params,
            &OverlayExtras::default(),
            &mut rng,
        )?;
        let border = rendered.get_pixel(10, 15);
        assert!(border[2] > 200 && border[0] < 10);
        assert_eq!(rendered.get_pixel(15, 15), &Rgb([18, 86, 153]));
        Ok(())
    }

    #[test]
    fn test_extras_only_when_set() -> Result<()> {
        let image = RgbImage::new(32, 32);
        let extras = OverlayExtras {
            bbox: Some(BoundingBox::new(4, 4, 20, 20)),
            points: Some(vec![[28.0, 28.0]]),
        };
        let mut rng = StdRng::seed_from_u64(0);

        let rendered = render(&[], &image, Device::Cpu, &flat_params(), &extras, &mut rng)?;
        assert_eq!(rendered.get_pixel(4, 10), &BBOX_COLOR);
        assert_eq!(rendered.get_pixel(5, 10), &BBOX_COLOR);
        assert_eq!(rendered.get_pixel(10, 10), &Rgb([0, 0, 0]));
        assert_eq!(rendered.get_pixel(28, 28), &POINT_COLOR);
        Ok(())
    }

    #[test]
    fn test_mismatched_mask_is_render_error() {
        let image = RgbImage::new(16, 16);
        let annotations = vec![block_annotation(32, 0, 0, 4)];
        let mut rng = StdRng::seed_from_u64(0);

        let result = render(
            &annotations,
            &image,
            Device::Cpu,
            &SegmentationParams::default(),
            &OverlayExtras::default(),
            &mut rng,
        );
        assert!(matches!(result, Err(MobileSamError::Render { .. })));
    }
}
