use crate::device::Device;
use crate::errors::Result;
use crate::types::Annotation;
use image::RgbImage;

/// Abstraction over the resident segmentation model.
///
/// Request handling depends on this trait rather than on the ONNX sessions, so the
/// pipeline and HTTP layer can be exercised with mocks.
pub trait MaskGenerator: Send + Sync {
    /// Generates annotations for a working-resolution RGB image.
    ///
    /// The result is returned in the order the model produced it; an empty vector
    /// means nothing was detected and is not an error.
    fn generate(&self, image: &RgbImage) -> Result<Vec<Annotation>>;

    /// Device the model is bound to.
    fn device(&self) -> Device;
}
