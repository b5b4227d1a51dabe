use image::Rgb;
use rand::Rng;

/// Opacity of a mask fill.
pub const MASK_ALPHA: f32 = 0.6;

pub const CONTOUR_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

pub const CONTOUR_ALPHA: f32 = 0.9;

pub const BBOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

pub const POINT_COLOR: Rgb<u8> = Rgb([255, 215, 0]);

/// Colors cycled through when random mask colors are off.
pub const PALETTE: [Rgb<u8>; 10] = [
    Rgb([30, 144, 255]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
    Rgb([148, 103, 189]),
    Rgb([140, 86, 75]),
    Rgb([227, 119, 194]),
    Rgb([127, 127, 127]),
    Rgb([188, 189, 34]),
    Rgb([23, 190, 207]),
];

/// One color per annotation, by input order.
pub fn mask_colors<R: Rng + ?Sized>(count: usize, random: bool, rng: &mut R) -> Vec<Rgb<u8>> {
    if random {
        (0..count).map(|_| Rgb(rng.gen())).collect()
    } else {
        PALETTE.iter().cycle().take(count).copied().collect()
    }
}
