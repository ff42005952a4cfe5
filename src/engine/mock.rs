//! Scriptable engine for testing and benchmarking
//!
//! [`MockEngine`] records every invocation (with start and end instants) and
//! can be configured to fail or to take a fixed amount of time, so tests can
//! observe concurrency, serialization and error handling without a real model.

use super::{BackgroundRemover, EngineError};
use image::{DynamicImage, RgbaImage};
use instant::{Duration, Instant};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// One recorded engine call
#[derive(Debug, Clone, Copy)]
pub struct Invocation {
    pub started: Instant,
    pub finished: Instant,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    /// Circular mask centered in the image
    Mask,
    /// Always fail with a processing error
    Fail,
    /// Return the input unchanged
    Identity,
}

/// Mock engine with call history
#[derive(Debug, Clone)]
pub struct MockEngine {
    behavior: Behavior,
    delay: Option<Duration>,
    history: Arc<Mutex<Vec<Invocation>>>,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
}

impl MockEngine {
    /// Engine that keeps a centered disc and clears everything else
    #[must_use]
    pub fn new() -> Self {
        Self {
            behavior: Behavior::Mask,
            delay: None,
            history: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Engine whose every call fails with [`EngineError::Processing`]
    #[must_use]
    pub fn new_failing() -> Self {
        Self {
            behavior: Behavior::Fail,
            ..Self::new()
        }
    }

    /// Engine that returns its input unchanged
    #[must_use]
    pub fn new_identity() -> Self {
        Self {
            behavior: Behavior::Identity,
            ..Self::new()
        }
    }

    /// Make every call block for `delay`
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Completed calls in completion order
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest number of calls observed running at the same time
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn circular_mask(image: &DynamicImage) -> RgbaImage {
        let mut rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius = width.min(height) as f32 / 3.0;

        for (x, y, pixel) in rgba.enumerate_pixels_mut() {
            let dx = x as f32 + 0.5 - center_x;
            let dy = y as f32 + 0.5 - center_y;
            if (dx * dx + dy * dy).sqrt() > radius {
                pixel[3] = 0;
            }
        }
        rgba
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundRemover for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn process(&self, image: &DynamicImage) -> Result<RgbaImage, EngineError> {
        let started = Instant::now();
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now_active, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let result = match self.behavior {
            Behavior::Mask => Ok(Self::circular_mask(image)),
            Behavior::Identity => Ok(image.to_rgba8()),
            Behavior::Fail => Err(EngineError::processing("Mock engine failure")),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut history) = self.history.lock() {
            history.push(Invocation {
                started,
                finished: Instant::now(),
                width: image.width(),
                height: image.height(),
            });
        }
        result
    }
}
