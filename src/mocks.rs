use crate::device::Device;
use crate::errors::{MobileSamError, Result};
use crate::traits::MaskGenerator;
use crate::types::Annotation;
use image::RgbImage;
use ndarray::{s, Array2};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// テスト用のモックマスク生成器
///
/// Regions are fractions `[x0, y0, x1, y1]` of the image, so the same mock works at
/// any working resolution.
#[derive(Debug, Clone, Default)]
pub struct MockMaskGenerator {
    pub regions: Vec<[f32; 4]>,
}

impl MockMaskGenerator {
    /// 何も検出しないモデル
    pub const fn empty() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// 大小2つの領域を返すモデル
    pub fn with_regions() -> Self {
        Self {
            regions: vec![[0.0, 0.0, 0.75, 0.75], [0.5, 0.5, 0.875, 0.875]],
        }
    }

    fn region_mask(region: &[f32; 4], width: u32, height: u32) -> Array2<bool> {
        let to_px = |v: f32, side: u32| ((v * side as f32).round() as usize).min(side as usize);
        let (x0, y0) = (to_px(region[0], width), to_px(region[1], height));
        let (x1, y1) = (to_px(region[2], width), to_px(region[3], height));

        let mut mask = Array2::from_elem((height as usize, width as usize), false);
        if x1 > x0 && y1 > y0 {
            mask.slice_mut(s![y0..y1, x0..x1]).fill(true);
        }
        mask
    }
}

impl MaskGenerator for MockMaskGenerator {
    fn generate(&self, image: &RgbImage) -> Result<Vec<Annotation>> {
        let (width, height) = image.dimensions();
        // テスト用の簡易実装：固定領域をそのままマスクとして返す
        Ok(self
            .regions
            .iter()
            .filter_map(|region| {
                let mask = Self::region_mask(region, width, height);
                let center = [
                    (region[0] + region[2]) / 2.0 * width as f32,
                    (region[1] + region[3]) / 2.0 * height as f32,
                ];
                Annotation::from_mask(mask, 0.95, 0.97, center)
            })
            .collect())
    }

    fn device(&self) -> Device {
        Device::Cpu
    }
}

/// 常に推論エラーを返すモデル
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingMaskGenerator;

impl MaskGenerator for FailingMaskGenerator {
    fn generate(&self, _image: &RgbImage) -> Result<Vec<Annotation>> {
        Err(MobileSamError::model(
            "mock inference",
            "simulated inference failure",
        ))
    }

    fn device(&self) -> Device {
        Device::Cpu
    }
}

/// Records how many generations overlap. Each generation sleeps for `delay`.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    delay: Duration,
    current: AtomicUsize,
    max_observed: AtomicUsize,
    calls: AtomicUsize,
    completed: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn max_observed(&self) -> usize {
        self.max_observed.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl MaskGenerator for ConcurrencyProbe {
    fn generate(&self, _image: &RgbImage) -> Result<Vec<Annotation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed.fetch_max(running, Ordering::SeqCst);

        thread::sleep(self.delay);

        self.current.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn device(&self) -> Device {
        Device::Cpu
    }
}
