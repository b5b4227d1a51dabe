use image::{GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::drawing::draw_filled_circle_mut;

/// Coverage layer holding the traced borders of `mask`, stroked `stroke_width` wide.
pub fn stroke_layer(mask: &GrayImage, stroke_width: u32) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut layer = GrayImage::new(width, height);
    let radius = (stroke_width / 2) as i32;

    for contour in find_contours::<i32>(mask) {
        for point in contour.points {
            if radius == 0 {
                layer.put_pixel(point.x as u32, point.y as u32, Luma([255]));
            } else {
                draw_filled_circle_mut(&mut layer, (point.x, point.y), radius, Luma([255]));
            }
        }
    }
    layer
}

/// Pixel-wise union of two coverage layers.
pub fn merge(mut a: GrayImage, b: GrayImage) -> GrayImage {
    for (p, q) in a.pixels_mut().zip(b.pixels()) {
        p[0] = p[0].max(q[0]);
    }
    a
}
