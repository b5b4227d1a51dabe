pub mod config;
pub mod device;
pub mod encode;
pub mod errors;
pub mod mask_generator;
pub mod model;
pub mod preprocess;
pub mod render;
pub mod server;
pub mod traits;
pub mod types;
pub mod worker;

pub mod mocks;

use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub use config::Config;
pub use device::{select_device, Device};
pub use errors::{MobileSamError, Result};
pub use model::MobileSam;
pub use traits::*;
pub use types::{Annotation, BoundingBox, OverlayExtras, SegmentationParams};
pub use worker::InferenceWorker;

#[cfg(test)]
pub use mocks::*;

/// Upload bytes in, overlay PNG out.
///
/// Decoding, rendering and encoding run on the blocking pool; mask generation goes
/// through the [`InferenceWorker`] admission gate.
pub struct SegmentationPipeline<G: MaskGenerator> {
    worker: InferenceWorker<G>,
}

impl<G: MaskGenerator + 'static> SegmentationPipeline<G> {
    pub fn new(generator: G, max_in_flight: usize) -> Self {
        Self {
            worker: InferenceWorker::new(generator, max_in_flight),
        }
    }

    pub async fn process(&self, bytes: Vec<u8>, params: SegmentationParams) -> Result<Vec<u8>> {
        params.validate()?;
        let started_at = Instant::now();

        let input_size = params.input_size;
        let image = Arc::new(
            tokio::task::spawn_blocking(move || preprocess::load_image(&bytes, input_size))
                .await??,
        );

        let annotations = self.worker.generate(Arc::clone(&image)).await?;
        debug!("{} annotations generated", annotations.len());

        let device = self.device();
        let png = tokio::task::spawn_blocking(move || {
            let mut rng = StdRng::from_entropy();
            let figure = render::render(
                &annotations,
                &image,
                device,
                &params,
                &OverlayExtras::default(),
                &mut rng,
            )?;
            encode::encode_png(&figure)
        })
        .await??;

        info!(
            "Segmented image in {:?} ({} bytes of PNG)",
            started_at.elapsed(),
            png.len()
        );
        Ok(png)
    }

    pub fn device(&self) -> Device {
        self.worker.generator().device()
    }

    pub fn worker(&self) -> &InferenceWorker<G> {
        &self.worker
    }

    /// Hands the generator back for release, if no request still holds it.
    pub fn shutdown(self) -> Option<G> {
        self.worker.into_generator()
    }
}
