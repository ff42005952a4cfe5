//! Output format handling service
//!
//! Converts engine output to the configured output format and encodes it with
//! the configured quality. Quality semantics differ per format:
//!
//! - PNG is lossless; quality selects compression effort
//!   (`>= 90` best, `>= 50` default, below that fast).
//! - JPEG uses quality directly (clamped to 1-100); alpha is dropped.
//! - WebP is encoded losslessly; quality is ignored.

use crate::{
    config::OutputFormat,
    error::{Result, ServiceError},
};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageBuffer, ImageEncoder, RgbaImage};

/// Service for converting and encoding processed images
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Convert an RGBA image to the pixel layout of the output format
    #[must_use]
    pub fn convert_format(rgba_image: RgbaImage, format: OutputFormat) -> DynamicImage {
        match format {
            OutputFormat::Png | OutputFormat::WebP => DynamicImage::ImageRgba8(rgba_image),
            OutputFormat::Jpeg => {
                // Convert RGBA to RGB by dropping alpha channel
                let (width, height) = rgba_image.dimensions();
                let mut rgb_image = ImageBuffer::new(width, height);

                for (x, y, pixel) in rgba_image.enumerate_pixels() {
                    rgb_image.put_pixel(x, y, image::Rgb([pixel[0], pixel[1], pixel[2]]));
                }

                DynamicImage::ImageRgb8(rgb_image)
            },
        }
    }

    /// Encode an RGBA image in the given format
    ///
    /// # Errors
    /// - Encoder failures from the image library
    /// - WebP requested without the `webp-support` feature
    pub fn encode(rgba_image: RgbaImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
        let (width, height) = rgba_image.dimensions();
        let image = Self::convert_format(rgba_image, format);
        let mut buffer = Vec::new();

        match format {
            OutputFormat::Png => {
                let encoder = PngEncoder::new_with_quality(
                    &mut buffer,
                    Self::png_compression(quality),
                    FilterType::Adaptive,
                );
                encoder
                    .write_image(image.as_bytes(), width, height, ExtendedColorType::Rgba8)
                    .map_err(|e| ServiceError::engine(format!("Failed to encode PNG: {}", e)))?;
            },
            OutputFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
                encoder
                    .write_image(image.as_bytes(), width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| ServiceError::engine(format!("Failed to encode JPEG: {}", e)))?;
            },
            #[cfg(feature = "webp-support")]
            OutputFormat::WebP => {
                let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut buffer);
                encoder
                    .write_image(image.as_bytes(), width, height, ExtendedColorType::Rgba8)
                    .map_err(|e| ServiceError::engine(format!("Failed to encode WebP: {}", e)))?;
            },
            #[cfg(not(feature = "webp-support"))]
            OutputFormat::WebP => {
                return Err(ServiceError::unsupported_format(
                    "WebP output requires the webp-support feature",
                ));
            },
        }

        Ok(buffer)
    }

    /// PNG compression effort for a 0-100 quality value
    #[must_use]
    pub fn png_compression(quality: u8) -> CompressionType {
        match quality {
            90.. => CompressionType::Best,
            50..=89 => CompressionType::Default,
            _ => CompressionType::Fast,
        }
    }

    /// HTTP content type for a format
    #[must_use]
    pub fn content_type(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::WebP => "image/webp",
        }
    }

    /// Check if a format supports transparency (alpha channel)
    #[must_use]
    pub fn supports_transparency(format: OutputFormat) -> bool {
        match format {
            OutputFormat::Png | OutputFormat::WebP => true,
            OutputFormat::Jpeg => false,
        }
    }

    /// Warn when the configured format will flatten removal results
    pub fn validate_for_background_removal(format: OutputFormat) {
        if !Self::supports_transparency(format) {
            tracing::warn!(
                %format,
                "output format does not support transparency; removed backgrounds will be flattened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_convert_format_jpeg_drops_alpha() {
        let rgba_image = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 128]));
        let converted = OutputFormatHandler::convert_format(rgba_image, OutputFormat::Jpeg);

        match converted {
            DynamicImage::ImageRgb8(rgb) => assert_eq!(rgb.get_pixel(1, 1).0, [255, 0, 0]),
            _ => panic!("Expected RGB8 image for JPEG format"),
        }
    }

    #[test]
    fn test_png_encoding_preserves_alpha() {
        let mut rgba_image = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]));
        rgba_image.put_pixel(0, 0, Rgba([0, 0, 0, 0]));

        let bytes = OutputFormatHandler::encode(rgba_image, OutputFormat::Png, 95).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();

        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
        assert_eq!(decoded.get_pixel(3, 2).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_jpeg_encoding_produces_jpeg() {
        let rgba_image = RgbaImage::from_pixel(8, 8, Rgba([200, 100, 50, 255]));
        let bytes = OutputFormatHandler::encode(rgba_image, OutputFormat::Jpeg, 0).unwrap();

        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_png_compression_mapping() {
        assert_eq!(
            OutputFormatHandler::png_compression(95),
            CompressionType::Best
        );
        assert_eq!(
            OutputFormatHandler::png_compression(60),
            CompressionType::Default
        );
        assert_eq!(
            OutputFormatHandler::png_compression(10),
            CompressionType::Fast
        );
    }

    #[test]
    fn test_content_type_and_transparency() {
        assert_eq!(
            OutputFormatHandler::content_type(OutputFormat::WebP),
            "image/webp"
        );
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::Png));
        assert!(!OutputFormatHandler::supports_transparency(
            OutputFormat::Jpeg
        ));
    }
}
