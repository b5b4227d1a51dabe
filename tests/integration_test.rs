use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use std::io::Cursor;

use mobilesam_rs::mocks::{FailingMaskGenerator, MockMaskGenerator};
use mobilesam_rs::{
    preprocess, Annotation, Device, MaskGenerator, MobileSamError, Result, SegmentationParams,
    SegmentationPipeline,
};

// 受け取った画像サイズを記録するテスト用モデル（統合テスト内で定義）
#[derive(Debug, Default)]
struct RecordingModel {
    seen: Mutex<Vec<(u32, u32)>>,
}

impl MaskGenerator for RecordingModel {
    fn generate(&self, image: &RgbImage) -> Result<Vec<Annotation>> {
        self.seen.lock().push(image.dimensions());
        Ok(Vec::new())
    }

    fn device(&self) -> Device {
        Device::Cpu
    }
}

fn png_upload(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

fn decode(png: &[u8]) -> RgbImage {
    image::load_from_memory_with_format(png, ImageFormat::Png)
        .unwrap()
        .into_rgb8()
}

fn palette_params(input_size: u32) -> SegmentationParams {
    SegmentationParams {
        input_size,
        mask_random_color: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_output_keeps_aspect_ratio() -> Result<()> {
    let pipeline = SegmentationPipeline::new(MockMaskGenerator::with_regions(), 1);

    let png = pipeline
        .process(png_upload(400, 200), palette_params(256))
        .await?;
    assert_eq!(decode(&png).dimensions(), (256, 128));

    let png = pipeline
        .process(png_upload(90, 300), palette_params(150))
        .await?;
    assert_eq!(decode(&png).dimensions(), (45, 150));
    Ok(())
}

#[tokio::test]
async fn test_model_sees_working_resolution() -> Result<()> {
    let pipeline = SegmentationPipeline::new(RecordingModel::default(), 1);

    pipeline
        .process(png_upload(640, 480), SegmentationParams::default())
        .await?;
    pipeline
        .process(png_upload(640, 480), palette_params(320))
        .await?;

    let seen = pipeline.worker().generator().seen.lock().clone();
    assert_eq!(seen, vec![(1024, 768), (320, 240)]);
    Ok(())
}

#[tokio::test]
async fn test_no_detections_returns_base_image() -> Result<()> {
    let pipeline = SegmentationPipeline::new(MockMaskGenerator::empty(), 1);
    let upload = png_upload(120, 80);

    let png = pipeline.process(upload.clone(), palette_params(60)).await?;
    // 検出なしの場合はリサイズ済みの元画像がそのまま返る
    assert_eq!(decode(&png), preprocess::load_image(&upload, 60)?);
    Ok(())
}

#[tokio::test]
async fn test_fixed_palette_is_deterministic() -> Result<()> {
    let pipeline = SegmentationPipeline::new(MockMaskGenerator::with_regions(), 1);
    let upload = png_upload(64, 64);

    let first = pipeline.process(upload.clone(), palette_params(64)).await?;
    let second = pipeline.process(upload.clone(), palette_params(64)).await?;
    assert_eq!(first, second);
    assert_ne!(decode(&first), preprocess::load_image(&upload, 64)?);
    Ok(())
}

#[tokio::test]
async fn test_all_render_options() -> Result<()> {
    let pipeline = SegmentationPipeline::new(MockMaskGenerator::with_regions(), 1);

    for better_quality in [false, true] {
        for use_retina in [false, true] {
            let params = SegmentationParams {
                input_size: 512,
                better_quality,
                use_retina,
                with_contours: better_quality,
                mask_random_color: use_retina,
            };
            let png = pipeline.process(png_upload(300, 600), params).await?;
            assert_eq!(decode(&png).dimensions(), (256, 512));
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_corrupt_upload_is_decode_error() {
    let pipeline = SegmentationPipeline::new(MockMaskGenerator::with_regions(), 1);

    let result = pipeline
        .process(b"\x89PNG but not really".to_vec(), SegmentationParams::default())
        .await;
    assert!(matches!(result, Err(MobileSamError::Decode { .. })));

    let result = pipeline
        .process(Vec::new(), SegmentationParams::default())
        .await;
    assert!(matches!(result, Err(MobileSamError::EmptyImage { .. })));
}

#[tokio::test]
async fn test_inference_failure_propagates() {
    let pipeline = SegmentationPipeline::new(FailingMaskGenerator, 1);

    let result = pipeline
        .process(png_upload(32, 32), SegmentationParams::default())
        .await;
    match result {
        Err(e) => assert!(!e.is_client_error()),
        Ok(_) => panic!("a failing model must not produce an image"),
    }
}
