//! Background removal engine contract
//!
//! The removal model is an external capability. The service only depends on
//! the [`BackgroundRemover`] trait: a synchronous, CPU-bound call that turns a
//! decoded image into an RGBA image whose background pixels are transparent.
//! Engines are invoked on the blocking thread pool while a worker slot is
//! held.
//!
//! Two implementations ship with the crate:
//! - [`BorderKeyEngine`], a pure-Rust heuristic used by default
//! - [`mock::MockEngine`], a scriptable engine for tests and benchmarks

pub mod border_key;
pub mod mock;

pub use self::border_key::BorderKeyEngine;

use crate::error::ServiceError;
use image::{DynamicImage, RgbaImage};
use thiserror::Error;

/// Failures reported by a removal engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine cannot work with this kind of image
    #[error("unsupported image: {0}")]
    UnsupportedFormat(String),

    /// The image data is unusable (e.g. zero-sized)
    #[error("corrupt input: {0}")]
    CorruptInput(String),

    /// The engine failed while processing a valid image
    #[error("processing failed: {0}")]
    Processing(String),
}

impl EngineError {
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    pub fn corrupt_input<S: Into<String>>(msg: S) -> Self {
        Self::CorruptInput(msg.into())
    }
}

impl From<EngineError> for ServiceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnsupportedFormat(msg) => Self::UnsupportedFormat(msg),
            EngineError::CorruptInput(msg) => Self::Input(msg),
            EngineError::Processing(msg) => Self::Engine(msg),
        }
    }
}

/// Trait for background removal engines
pub trait BackgroundRemover: Send + Sync {
    /// Short engine identifier used in logs and health output
    fn name(&self) -> &str;

    /// Remove the background of `image`
    ///
    /// The returned image has the same dimensions as the input.
    ///
    /// # Errors
    /// - [`EngineError`] describing why the image could not be processed
    fn process(&self, image: &DynamicImage) -> Result<RgbaImage, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_classification() {
        assert!(matches!(
            ServiceError::from(EngineError::CorruptInput("empty".into())),
            ServiceError::Input(_)
        ));
        assert!(matches!(
            ServiceError::from(EngineError::UnsupportedFormat("cmyk".into())),
            ServiceError::UnsupportedFormat(_)
        ));
        assert!(matches!(
            ServiceError::from(EngineError::processing("oom")),
            ServiceError::Engine(_)
        ));
    }

    #[test]
    fn test_engine_behind_trait_object() {
        let engine: std::sync::Arc<dyn BackgroundRemover> =
            std::sync::Arc::new(BorderKeyEngine::default());
        let image = DynamicImage::new_rgba8(4, 4);
        assert_eq!(engine.name(), "border-key");
        assert_eq!(engine.process(&image).unwrap().dimensions(), (4, 4));
    }
}
