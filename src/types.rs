use crate::errors::{MobileSamError, Result};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// Resolution the overlay proportions are tuned for.
pub const REFERENCE_SIZE: u32 = 1024;

/// Largest accepted `input_size`.
pub const MAX_INPUT_SIZE: u32 = 4096;

/// Per-request segmentation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    pub input_size: u32,
    pub better_quality: bool,
    pub with_contours: bool,
    pub use_retina: bool,
    pub mask_random_color: bool,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            input_size: REFERENCE_SIZE,
            better_quality: false,
            with_contours: true,
            use_retina: true,
            mask_random_color: true,
        }
    }
}

impl SegmentationParams {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(MobileSamError::validation(
                "input_size",
                "must be a positive integer",
            ));
        }
        if self.input_size > MAX_INPUT_SIZE {
            return Err(MobileSamError::validation(
                "input_size",
                format!("must not exceed {MAX_INPUT_SIZE}"),
            ));
        }
        Ok(())
    }

    /// `floor(1024 / input_size)`, never below 1 so large inputs keep a visible stroke.
    pub const fn scale(&self) -> u32 {
        let scale = REFERENCE_SIZE / if self.input_size == 0 { 1 } else { self.input_size };
        if scale == 0 {
            1
        } else {
            scale
        }
    }
}

/// Axis-aligned box in XYWH pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn iou(&self, other: &Self) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) as u64 * (y2 - y1) as u64;
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            0.0
        } else {
            intersection as f32 / union as f32
        }
    }
}

/// One detected region.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Region membership, shape `[height, width]` of the working image.
    pub segmentation: Array2<bool>,
    pub bbox: BoundingBox,
    pub predicted_iou: f32,
    pub stability_score: f32,
    pub area: u32,
    /// Prompt point (working image coordinates) that produced this mask.
    pub point_coords: [f32; 2],
}

impl Annotation {
    /// Builds an annotation from a binary mask, or `None` when the mask is empty.
    pub fn from_mask(
        segmentation: Array2<bool>,
        predicted_iou: f32,
        stability_score: f32,
        point_coords: [f32; 2],
    ) -> Option<Self> {
        let bbox = mask_to_box(segmentation.view())?;
        let area = segmentation.iter().filter(|&&v| v).count() as u32;
        Some(Self {
            segmentation,
            bbox,
            predicted_iou,
            stability_score,
            area,
            point_coords,
        })
    }

    pub fn height(&self) -> u32 {
        self.segmentation.nrows() as u32
    }

    pub fn width(&self) -> u32 {
        self.segmentation.ncols() as u32
    }
}

/// Tight bounding box of the `true` cells of a mask.
pub fn mask_to_box(mask: ArrayView2<bool>) -> Option<BoundingBox> {
    let (height, width) = mask.dim();
    // [x1, y1, x2, y2]
    let mut bounds = [width, height, 0, 0];
    let mut found = false;

    for ((y, x), &inside) in mask.indexed_iter() {
        if inside {
            found = true;
            bounds[0] = bounds[0].min(x);
            bounds[1] = bounds[1].min(y);
            bounds[2] = bounds[2].max(x);
            bounds[3] = bounds[3].max(y);
        }
    }

    found.then(|| {
        BoundingBox::new(
            bounds[0] as u32,
            bounds[1] as u32,
            (bounds[2] - bounds[0] + 1) as u32,
            (bounds[3] - bounds[1] + 1) as u32,
        )
    })
}

/// Optional drawings layered on top of the masks. Nothing is drawn by default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayExtras {
    pub bbox: Option<BoundingBox>,
    pub points: Option<Vec<[f32; 2]>>,
}
