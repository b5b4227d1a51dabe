//! Automatic (prompt-free) mask generation.
//!
//! A regular grid of single-point prompts is decoded one point at a time. Every
//! candidate mask is scored by the model's IoU prediction and by its stability under
//! a shifted binarization threshold, and overlapping survivors are pruned with box
//! NMS. This is the prompt-free mode of Segment Anything, without crop layers.

use crate::errors::{MobileSamError, Result};
use crate::types::{Annotation, BoundingBox};
use ndarray::prelude::*;
use rayon::prelude::*;
use tracing::debug;

/// Thresholds for the automatic generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub points_per_side: u32,
    pub pred_iou_thresh: f32,
    pub stability_score_thresh: f32,
    pub stability_score_offset: f32,
    pub box_nms_thresh: f32,
    /// Logit above which a pixel belongs to the mask.
    pub mask_threshold: f32,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            points_per_side: 32,
            pred_iou_thresh: 0.88,
            stability_score_thresh: 0.95,
            stability_score_offset: 1.0,
            box_nms_thresh: 0.7,
            mask_threshold: 0.0,
        }
    }
}

/// Decoder output for one point prompt.
#[derive(Debug, Clone)]
pub struct PointPrediction {
    /// Mask logits, shape `[num_masks, height, width]`.
    pub masks: Array3<f32>,
    /// One predicted IoU per mask.
    pub iou_predictions: Vec<f32>,
}

/// Grid of `n x n` points in normalized `[0, 1]` coordinates, cell centred.
pub fn build_point_grid(points_per_side: u32) -> Vec<[f32; 2]> {
    let n = points_per_side as f32;
    let offset = 1.0 / (2.0 * n);
    let step = |i: u32| offset + i as f32 / n;

    (0..points_per_side)
        .flat_map(|y| (0..points_per_side).map(move |x| [step(x), step(y)]))
        .collect()
}

/// Ratio of pixels above `threshold + offset` to pixels above `threshold - offset`.
pub fn stability_score(logits: ArrayView2<f32>, threshold: f32, offset: f32) -> f32 {
    let (mut intersections, mut unions) = (0u64, 0u64);
    for &logit in logits.iter() {
        if logit > threshold + offset {
            intersections += 1;
        }
        if logit > threshold - offset {
            unions += 1;
        }
    }

    if unions == 0 {
        0.0
    } else {
        intersections as f32 / unions as f32
    }
}

/// Binary mask stored as row-major run lengths, alternating `false`/`true` and
/// starting with a (possibly empty) `false` run.
///
/// Candidates stay in this form until NMS has picked the survivors; a mostly empty
/// full-resolution mask shrinks to a few hundred runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskRle {
    height: usize,
    width: usize,
    counts: Vec<u32>,
}

impl MaskRle {
    /// Encodes `logits > threshold` without materializing the boolean mask.
    pub fn from_logits(logits: ArrayView2<f32>, threshold: f32) -> Self {
        let (height, width) = logits.dim();
        Self::from_cells(height, width, logits.iter().map(|&v| v > threshold))
    }

    pub fn from_mask(mask: ArrayView2<bool>) -> Self {
        let (height, width) = mask.dim();
        Self::from_cells(height, width, mask.iter().copied())
    }

    fn from_cells(height: usize, width: usize, cells: impl Iterator<Item = bool>) -> Self {
        let mut counts = Vec::new();
        let mut current = false;
        let mut run = 0u32;
        for cell in cells {
            if cell != current {
                counts.push(run);
                current = cell;
                run = 0;
            }
            run += 1;
        }
        counts.push(run);
        Self {
            height,
            width,
            counts,
        }
    }

    pub fn runs(&self) -> usize {
        self.counts.len()
    }

    pub fn area(&self) -> u32 {
        self.counts.iter().skip(1).step_by(2).sum()
    }

    /// `(start, len)` of every `true` run, in row-major cell offsets.
    fn true_runs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut offset = 0usize;
        self.counts.iter().enumerate().filter_map(move |(i, &count)| {
            let start = offset;
            offset += count as usize;
            (i % 2 == 1 && count > 0).then_some((start, count as usize))
        })
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        if self.width == 0 {
            return None;
        }
        // [x1, y1, x2, y2]
        let mut bounds: Option<[usize; 4]> = None;
        for (start, len) in self.true_runs() {
            let end = start + len - 1;
            let (row_start, row_end) = (start / self.width, end / self.width);
            let (x1, x2) = if row_start == row_end {
                (start % self.width, end % self.width)
            } else {
                (0, self.width - 1)
            };
            let b = bounds.get_or_insert([x1, row_start, x2, row_end]);
            b[0] = b[0].min(x1);
            b[1] = b[1].min(row_start);
            b[2] = b[2].max(x2);
            b[3] = b[3].max(row_end);
        }

        bounds.map(|[x1, y1, x2, y2]| {
            BoundingBox::new(
                x1 as u32,
                y1 as u32,
                (x2 - x1 + 1) as u32,
                (y2 - y1 + 1) as u32,
            )
        })
    }

    pub fn decode(&self) -> Array2<bool> {
        let mut mask = Array2::from_elem((self.height, self.width), false);
        if let Some(cells) = mask.as_slice_mut() {
            for (start, len) in self.true_runs() {
                cells[start..start + len].fill(true);
            }
        }
        mask
    }
}

/// A mask that passed the score filters but has not been through NMS yet.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub mask: MaskRle,
    pub bbox: BoundingBox,
    pub predicted_iou: f32,
    pub stability_score: f32,
    pub area: u32,
    pub point_coords: [f32; 2],
}

impl Candidate {
    /// `None` when the encoded mask is empty.
    pub fn new(
        mask: MaskRle,
        predicted_iou: f32,
        stability_score: f32,
        point_coords: [f32; 2],
    ) -> Option<Self> {
        let bbox = mask.bbox()?;
        let area = mask.area();
        Some(Self {
            mask,
            bbox,
            predicted_iou,
            stability_score,
            area,
            point_coords,
        })
    }

    pub fn into_annotation(self) -> Annotation {
        Annotation {
            segmentation: self.mask.decode(),
            bbox: self.bbox,
            predicted_iou: self.predicted_iou,
            stability_score: self.stability_score,
            area: self.area,
            point_coords: self.point_coords,
        }
    }
}

/// Greedy box NMS; keeps the highest `predicted_iou` first.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.predicted_iou.total_cmp(&a.predicted_iou));

    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

pub struct AutomaticMaskGenerator {
    settings: GeneratorSettings,
}

impl AutomaticMaskGenerator {
    pub const fn new(settings: GeneratorSettings) -> Self {
        Self { settings }
    }

    pub const fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Runs the point grid over a `width x height` image.
    ///
    /// `predict` receives each prompt point in image coordinates and must return masks
    /// at the image resolution. Only NMS survivors are expanded back to full masks.
    pub fn generate<F>(&self, width: u32, height: u32, mut predict: F) -> Result<Vec<Annotation>>
    where
        F: FnMut([f32; 2]) -> Result<PointPrediction>,
    {
        let points = build_point_grid(self.settings.points_per_side);
        let mut candidates = Vec::new();

        for [nx, ny] in points {
            let point = [nx * width as f32, ny * height as f32];
            let prediction = predict(point)?;
            candidates.extend(self.filter_prediction(prediction, point, width, height)?);
        }

        let total = candidates.len();
        let runs: usize = candidates.iter().map(|c| c.mask.runs()).sum();
        let kept = non_max_suppression(candidates, self.settings.box_nms_thresh);
        debug!(
            "Mask generation kept {} of {} candidates after NMS ({} runs held)",
            kept.len(),
            total,
            runs
        );
        Ok(kept.into_iter().map(Candidate::into_annotation).collect())
    }

    fn filter_prediction(
        &self,
        prediction: PointPrediction,
        point: [f32; 2],
        width: u32,
        height: u32,
    ) -> Result<Vec<Candidate>> {
        let PointPrediction {
            masks,
            iou_predictions,
        } = prediction;
        let (num_masks, mask_height, mask_width) = masks.dim();

        if (mask_width, mask_height) != (width as usize, height as usize) {
            return Err(MobileSamError::model(
                "decoder output validation",
                format!(
                    "mask size {}x{} does not match image size {}x{}",
                    mask_width, mask_height, width, height
                ),
            ));
        }
        if iou_predictions.len() != num_masks {
            return Err(MobileSamError::model(
                "decoder output validation",
                format!(
                    "{} IoU predictions for {} masks",
                    iou_predictions.len(),
                    num_masks
                ),
            ));
        }

        // 4 masks means the single-mask token came first; only the multimask outputs are used
        let first = if num_masks == 4 { 1 } else { 0 };
        let settings = &self.settings;

        let candidates = (first..num_masks)
            .into_par_iter()
            .filter(|&i| iou_predictions[i] > settings.pred_iou_thresh)
            .filter_map(|i| {
                let logits = masks.index_axis(Axis(0), i);
                let stability = stability_score(
                    logits,
                    settings.mask_threshold,
                    settings.stability_score_offset,
                );
                if stability < settings.stability_score_thresh {
                    return None;
                }

                let mask = MaskRle::from_logits(logits, settings.mask_threshold);
                Candidate::new(mask, iou_predictions[i], stability, point)
            })
            .collect();

        Ok(candidates)
    }
}
