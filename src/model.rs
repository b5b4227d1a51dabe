use std::path::Path;

use crate::{
    config::Config,
    device::{select_device, Device},
    errors::{MobileSamError, Result},
    mask_generator::{AutomaticMaskGenerator, GeneratorSettings, PointPrediction},
    traits::MaskGenerator,
    types::Annotation,
};
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use tracing::{debug, info, info_span};

/// Model variant the checkpoints are exported from.
pub const MODEL_TYPE: &str = "vit_t";

/// Side of the square encoder input when the session does not declare one.
const DEFAULT_ENCODER_SIZE: u32 = 1024;

/// Resolution of the decoder's dense mask prompt.
const MASK_INPUT_SIZE: usize = 256;

const PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
const PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// The resident MobileSAM model: image encoder plus prompt/mask decoder.
///
/// Sessions need exclusive access to run, so each sits behind its own mutex; the handle
/// itself is shared read-only for the life of the process.
pub struct MobileSam {
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    encoder_input: String,
    encoder_size: u32,
    device: Device,
    generator: AutomaticMaskGenerator,
}

impl MobileSam {
    /// Loads both checkpoints and binds them to the best available device.
    ///
    /// Any failure here is fatal for the process; there is nothing to serve without a model.
    pub fn load(config: &Config) -> Result<Self> {
        let device = select_device(config.device_id, config.force_cpu);
        Self::load_with_device(
            &config.encoder_path,
            &config.decoder_path,
            device,
            config.num_threads,
            config.generator_settings(),
        )
    }

    pub fn load_with_device(
        encoder_path: &Path,
        decoder_path: &Path,
        device: Device,
        num_threads: usize,
        settings: GeneratorSettings,
    ) -> Result<Self> {
        let _span = info_span!("model_load", model_type = MODEL_TYPE, %device).entered();

        for path in [encoder_path, decoder_path] {
            if !path.is_file() {
                return Err(MobileSamError::FileSystem {
                    path: path.to_path_buf(),
                    operation: "checkpoint lookup".to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "checkpoint file does not exist",
                    ),
                });
            }
        }

        info!("Loading encoder from {}", encoder_path.display());
        let mut encoder = build_session(encoder_path, device, num_threads)?;
        info!("Loading decoder from {}", decoder_path.display());
        let decoder = build_session(decoder_path, device, num_threads)?;

        let input = encoder.inputs.first().ok_or_else(|| {
            MobileSamError::model("encoder input lookup", "encoder declares no inputs")
        })?;
        let encoder_input = input.name.clone();
        let encoder_size = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.last().copied())
            .filter(|&side| side > 0)
            .map_or(DEFAULT_ENCODER_SIZE, |side| side as u32);

        // initialize model
        let data = Array4::<f32>::zeros((1, 3, encoder_size as usize, encoder_size as usize));
        encoder
            .run(ort::inputs![encoder_input.as_str() => TensorRef::from_array_view(&data)
                .map_err(|e| MobileSamError::model("warm-up tensor creation", e))?])
            .map_err(|e| MobileSamError::model("encoder warm-up run", e))?;

        info!(
            "MobileSAM ready on {} (encoder input `{}`, {}px)",
            device, encoder_input, encoder_size
        );

        Ok(Self {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            encoder_input,
            encoder_size,
            device,
            generator: AutomaticMaskGenerator::new(settings),
        })
    }

    /// Image embeddings for the whole working image.
    pub fn embed(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let tensor = preprocess(image, self.encoder_size);
        let mut encoder = self.encoder.lock();
        let outputs = encoder
            .run(ort::inputs![self.encoder_input.as_str() => TensorRef::from_array_view(&tensor)?])
            .map_err(|e| MobileSamError::model("encoder run", e))?;

        Ok(outputs[0]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }

    /// Masks for a single foreground point given in working image coordinates.
    pub fn decode_point(
        &self,
        embeddings: &Array4<f32>,
        point: [f32; 2],
        width: u32,
        height: u32,
    ) -> Result<PointPrediction> {
        let ratio = self.encoder_size as f32 / width.max(height) as f32;
        // the second point pads the prompt the way the exported decoder expects
        let point_coords = array![[[point[0] * ratio, point[1] * ratio], [0.0, 0.0]]];
        let point_labels = array![[1.0f32, -1.0]];
        let mask_input = Array4::<f32>::zeros((1, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE));
        let has_mask_input = array![0.0f32];
        let orig_im_size = array![height as f32, width as f32];

        let mut decoder = self.decoder.lock();
        let outputs = decoder
            .run(ort::inputs![
                "image_embeddings" => TensorRef::from_array_view(embeddings)?,
                "point_coords" => TensorRef::from_array_view(&point_coords)?,
                "point_labels" => TensorRef::from_array_view(&point_labels)?,
                "mask_input" => TensorRef::from_array_view(&mask_input)?,
                "has_mask_input" => TensorRef::from_array_view(&has_mask_input)?,
                "orig_im_size" => TensorRef::from_array_view(&orig_im_size)?,
            ])
            .map_err(|e| MobileSamError::model("decoder run", e))?;

        let masks = outputs["masks"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .index_axis_move(Axis(0), 0)
            .to_owned();
        let iou_predictions = outputs["iou_predictions"]
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();

        Ok(PointPrediction {
            masks,
            iou_predictions,
        })
    }

    /// Releases the sessions.
    pub fn release(self) {
        info!("Releasing MobileSAM sessions on {}", self.device);
        drop(self);
    }
}

impl MaskGenerator for MobileSam {
    fn generate(&self, image: &RgbImage) -> Result<Vec<Annotation>> {
        let (width, height) = image.dimensions();
        let _span = info_span!("generate", width, height).entered();

        let embeddings = self.embed(image)?;
        debug!("Image embeddings shape: {:?}", embeddings.shape());

        self.generator
            .generate(width, height, |point| {
                self.decode_point(&embeddings, point, width, height)
            })
    }

    fn device(&self) -> Device {
        self.device
    }
}

fn build_session(path: &Path, device: Device, num_threads: usize) -> Result<Session> {
    let operation = |step: &str| format!("{} ({})", step, path.display());

    Session::builder()
        .map_err(|e| MobileSamError::model(operation("session builder initialization"), e))?
        .with_execution_providers(device.execution_providers())
        .map_err(|e| MobileSamError::model(operation("execution provider registration"), e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MobileSamError::model(operation("optimization level"), e))?
        .with_intra_threads(num_threads)
        .map_err(|e| MobileSamError::model(operation("intra-op thread count"), e))?
        .with_memory_pattern(true)
        .map_err(|e| MobileSamError::model(operation("memory pattern"), e))?
        .commit_from_file(path)
        .map_err(|e| MobileSamError::model(operation("checkpoint load"), e))
}

/// Encoder input tensor: longest side resized to `encoder_size`, normalized,
/// zero-padded bottom/right to a square, NCHW.
pub fn preprocess(image: &RgbImage, encoder_size: u32) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let ratio = encoder_size as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * ratio).round() as u32).clamp(1, encoder_size);
    let new_height = ((height as f32 * ratio).round() as u32).clamp(1, encoder_size);

    let resized;
    let image = if (new_width, new_height) == (width, height) {
        image
    } else {
        resized = imageops::resize(image, new_width, new_height, FilterType::Triangle);
        &resized
    };

    let size = encoder_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    // (channel, y, x)
    let pixels = image.as_ndarray3();
    for (c, (mean, std)) in PIXEL_MEAN.iter().zip(PIXEL_STD.iter()).enumerate() {
        tensor
            .slice_mut(s![0, c, ..new_height as usize, ..new_width as usize])
            .zip_mut_with(&pixels.index_axis(Axis(0), c), |dst, &src| {
                *dst = (src as f32 - mean) / std;
            });
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_preprocess_pads_bottom_right() {
        let image = RgbImage::from_pixel(8, 4, Rgb([255, 255, 255]));
        let tensor = preprocess(&image, 16);

        assert_eq!(tensor.shape(), &[1, 3, 16, 16]);
        let expected = (255.0 - PIXEL_MEAN[0]) / PIXEL_STD[0];
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-4);
        assert!((tensor[[0, 0, 7, 15]] - expected).abs() < 1e-4);
        // padding stays zero
        assert_eq!(tensor[[0, 0, 8, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 15, 15]], 0.0);
    }

    #[test]
    fn test_preprocess_keeps_channel_order() {
        let image = RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]));
        let tensor = preprocess(&image, 4);

        assert!(tensor[[0, 0, 1, 1]] > 0.0);
        assert!(tensor[[0, 1, 1, 1]] < 0.0);
        assert!(tensor[[0, 2, 1, 1]] < 0.0);
    }

    #[test]
    fn test_missing_checkpoint_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let encoder = temp_dir.path().join("encoder.onnx");
        let decoder = temp_dir.path().join("decoder.onnx");

        let result = MobileSam::load_with_device(
            &encoder,
            &decoder,
            Device::Cpu,
            1,
            GeneratorSettings::default(),
        );
        match result {
            Err(MobileSamError::FileSystem { path, .. }) => assert_eq!(path, encoder),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("loading a missing checkpoint must fail"),
        }
    }

    #[test]
    fn test_corrupt_checkpoint_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let encoder = temp_dir.path().join("encoder.onnx");
        let decoder = temp_dir.path().join("decoder.onnx");
        std::fs::write(&encoder, b"not an onnx graph").unwrap();
        std::fs::write(&decoder, b"not an onnx graph").unwrap();

        let result = MobileSam::load_with_device(
            &encoder,
            &decoder,
            Device::Cpu,
            1,
            GeneratorSettings::default(),
        );
        assert!(matches!(result, Err(MobileSamError::Model { .. })));
    }
}
