//! Image decoding service
//!
//! Separates input validation and decoding from request orchestration. Input
//! formats are detected from content, never from file names or declared
//! content types.

use crate::error::{Result, ServiceError};
use image::{DynamicImage, ImageFormat};
use std::path::Path;

/// Formats the service accepts as input
///
/// WebP decoding needs the `webp-support` feature; without it a WebP upload
/// is reported as an unsupported format.
pub const SUPPORTED_INPUT_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::WebP,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
];

/// Service for validating and decoding uploaded images
pub struct ImageIOService;

impl ImageIOService {
    /// Detect the container format of raw image bytes
    ///
    /// # Errors
    /// - `Input` for empty or unrecognizable data
    /// - `UnsupportedFormat` for recognized formats the service does not decode
    pub fn sniff_format(data: &[u8]) -> Result<ImageFormat> {
        if data.is_empty() {
            return Err(ServiceError::input("Uploaded image is empty"));
        }

        let format = image::guess_format(data).map_err(|_| {
            ServiceError::input(format!(
                "Unrecognized image data ({} bytes). Supported formats: {}",
                data.len(),
                Self::supported_formats_list()
            ))
        })?;

        if !SUPPORTED_INPUT_FORMATS.contains(&format) {
            return Err(ServiceError::unsupported_format(format!(
                "{:?} input is not supported. Supported formats: {}",
                format,
                Self::supported_formats_list()
            )));
        }

        Ok(format)
    }

    /// Decode raw image bytes
    ///
    /// # Errors
    /// - Errors from [`ImageIOService::sniff_format`]
    /// - `Input` when the data is truncated or corrupt
    pub fn decode(data: &[u8]) -> Result<DynamicImage> {
        let format = Self::sniff_format(data)?;
        image::load_from_memory_with_format(data, format).map_err(|e| match e {
            image::ImageError::Unsupported(u) => {
                ServiceError::unsupported_format(format!("{:?}: {}", format, u))
            },
            other => ServiceError::input(format!(
                "Corrupt {:?} image ({} bytes): {}",
                format,
                data.len(),
                other
            )),
        })
    }

    /// Load and decode an image file (content-based format detection)
    ///
    /// # Errors
    /// - I/O errors reading the file
    /// - Errors from [`ImageIOService::decode`]
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();
        let data = std::fs::read(path_ref)
            .map_err(|e| ServiceError::scratch_io_error("read image data", path_ref, &e))?;
        Self::decode(&data)
    }

    fn supported_formats_list() -> String {
        SUPPORTED_INPUT_FORMATS
            .iter()
            .map(|f| format!("{:?}", f).to_uppercase())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_decode_png() {
        let image = ImageIOService::decode(&png_bytes()).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    #[test]
    fn test_empty_input_is_an_input_error() {
        assert!(matches!(
            ImageIOService::decode(&[]),
            Err(ServiceError::Input(_))
        ));
    }

    #[test]
    fn test_garbage_input_is_an_input_error() {
        assert!(matches!(
            ImageIOService::decode(b"definitely not an image"),
            Err(ServiceError::Input(_))
        ));
    }

    #[test]
    fn test_truncated_png_is_corrupt_input() {
        let bytes = png_bytes();
        let truncated = bytes.get(..bytes.len() / 2).unwrap();
        let err = ImageIOService::decode(truncated).unwrap_err();
        assert!(matches!(err, ServiceError::Input(_)));
        assert!(err.to_string().contains("Corrupt"));
    }

    #[test]
    fn test_recognized_but_unsupported_format() {
        let gif_header = b"GIF89a\x01\x00\x01\x00\x00\x00\x00";
        assert!(matches!(
            ImageIOService::sniff_format(gif_header),
            Err(ServiceError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_load_image_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        std::fs::write(&path, png_bytes()).unwrap();

        let image = ImageIOService::load_image(&path).unwrap();
        assert_eq!(image.width(), 3);
        assert!(ImageIOService::load_image(dir.path().join("missing.png")).is_err());
    }
}
