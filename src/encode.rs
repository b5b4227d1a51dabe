use crate::errors::{MobileSamError, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

/// Encodes the rendered figure as PNG into an owned buffer.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| MobileSamError::ImageProcessing {
            operation: "PNG encoding".to_string(),
            source: Box::new(e),
        })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_png_signature_and_dimensions() -> Result<()> {
        let image = RgbImage::from_fn(7, 3, |x, y| Rgb([x as u8 * 30, y as u8 * 80, 200]));
        let bytes = encode_png(&image)?;

        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&bytes)?.into_rgb8();
        assert_eq!(decoded, image);
        Ok(())
    }

    #[test]
    fn test_buffer_outlives_source() -> Result<()> {
        let bytes = {
            let image = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
            encode_png(&image)?
        };
        assert!(!bytes.is_empty());
        Ok(())
    }
}
