use crate::errors::{MobileSamError, Result};
use crate::traits::MaskGenerator;
use crate::types::Annotation;
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::debug;

/// Runs mask generation off the async runtime, admitting a bounded number of
/// generations at a time.
///
/// Waiters are admitted in arrival order. Once a generation has been admitted it runs
/// to completion on the blocking pool even if the caller stops waiting for it.
pub struct InferenceWorker<G: MaskGenerator> {
    generator: Arc<G>,
    admission: Arc<Semaphore>,
    max_in_flight: usize,
}

impl<G: MaskGenerator + 'static> InferenceWorker<G> {
    pub fn new(generator: G, max_in_flight: usize) -> Self {
        Self::from_shared(Arc::new(generator), max_in_flight)
    }

    pub fn from_shared(generator: Arc<G>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            generator,
            admission: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub async fn generate(&self, image: Arc<RgbImage>) -> Result<Vec<Annotation>> {
        let queued_at = Instant::now();
        let permit = Arc::clone(&self.admission)
            .acquire_owned()
            .await
            .map_err(|e| MobileSamError::Worker {
                operation: "inference admission".to_string(),
                source: Box::new(e),
            })?;
        debug!("Admitted to inference after {:?}", queued_at.elapsed());

        let generator = Arc::clone(&self.generator);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let started_at = Instant::now();
            let annotations = generator.generate(&image);
            debug!("Mask generation finished in {:?}", started_at.elapsed());
            annotations
        })
        .await?
    }

    /// Number of generations currently admitted.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.admission.available_permits()
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Gives the generator back once no generation holds a reference to it.
    pub fn into_generator(self) -> Option<G> {
        Arc::try_unwrap(self.generator).ok()
    }
}
