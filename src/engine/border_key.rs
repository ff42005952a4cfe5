//! Border color keying engine
//!
//! A model-free removal heuristic for product shots on plain backdrops. The
//! background color is estimated as the per-channel median of the image
//! border. Every pixel whose color lies within `tolerance` of that estimate
//! and that is connected to the border through such pixels is treated as
//! background. Alpha ramps from fully transparent (distance up to half the
//! tolerance) to fully opaque (distance at the tolerance), which feathers the
//! subject edge.

use super::{BackgroundRemover, EngineError};
use crate::config::DEFAULT_ENGINE_TOLERANCE;
use image::{DynamicImage, Rgba, RgbaImage};
use std::collections::VecDeque;

/// Removes a uniform background connected to the image border
#[derive(Debug, Clone)]
pub struct BorderKeyEngine {
    tolerance: u8,
}

impl BorderKeyEngine {
    /// Create an engine with the given color tolerance (0-255)
    #[must_use]
    pub fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }

    #[must_use]
    pub fn tolerance(&self) -> u8 {
        self.tolerance
    }

    /// Estimate the background color from the border pixels
    fn estimate_background(image: &RgbaImage) -> [u8; 3] {
        let (width, height) = image.dimensions();
        let mut channels: [Vec<u8>; 3] = Default::default();

        for (x, y) in border_coordinates(width, height) {
            let pixel = image.get_pixel(x, y);
            for (channel, values) in channels.iter_mut().enumerate() {
                values.push(pixel[channel]);
            }
        }

        let mut background = [0u8; 3];
        for (slot, values) in background.iter_mut().zip(channels.iter_mut()) {
            values.sort_unstable();
            *slot = values.get(values.len() / 2).copied().unwrap_or(0);
        }
        background
    }

    /// Alpha for a pixel at `distance` from the background color
    ///
    /// `None` means the pixel is outside the tolerance and belongs to the
    /// subject.
    fn keyed_alpha(&self, distance: u8) -> Option<u8> {
        if distance > self.tolerance {
            return None;
        }
        let solid = self.tolerance / 2;
        if distance <= solid {
            return Some(0);
        }
        let ramp = f32::from(self.tolerance - solid);
        let position = f32::from(distance - solid);
        Some((255.0 * position / ramp).round() as u8)
    }
}

impl Default for BorderKeyEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_TOLERANCE)
    }
}

/// Chebyshev distance between a pixel's color and the background color
fn color_distance(pixel: &Rgba<u8>, background: [u8; 3]) -> u8 {
    (0..3)
        .map(|c| pixel[c].abs_diff(background[c]))
        .max()
        .unwrap_or(0)
}

fn border_coordinates(width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    let horizontal = (0..width).flat_map(move |x| [(x, 0), (x, height - 1)]);
    let vertical = (1..height.saturating_sub(1)).flat_map(move |y| [(0, y), (width - 1, y)]);
    horizontal.chain(vertical)
}

impl BackgroundRemover for BorderKeyEngine {
    fn name(&self) -> &str {
        "border-key"
    }

    fn process(&self, image: &DynamicImage) -> Result<RgbaImage, EngineError> {
        let mut rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(EngineError::corrupt_input(format!(
                "image has no pixels ({}x{})",
                width, height
            )));
        }

        let background = Self::estimate_background(&rgba);
        let index = |x: u32, y: u32| (y as usize) * (width as usize) + (x as usize);
        let mut visited = vec![false; (width as usize) * (height as usize)];
        let mut queue = VecDeque::new();

        for (x, y) in border_coordinates(width, height) {
            if let Some(seen) = visited.get_mut(index(x, y)) {
                if !*seen {
                    *seen = true;
                    queue.push_back((x, y));
                }
            }
        }

        let mut keyed = 0usize;
        while let Some((x, y)) = queue.pop_front() {
            let pixel = *rgba.get_pixel(x, y);
            let Some(alpha) = self.keyed_alpha(color_distance(&pixel, background)) else {
                continue;
            };

            keyed += 1;
            let combined = ((u16::from(alpha) * u16::from(pixel[3])) / 255) as u8;
            rgba.put_pixel(x, y, Rgba([pixel[0], pixel[1], pixel[2], combined]));

            let neighbors = [
                (x.checked_sub(1), Some(y)),
                ((x + 1 < width).then_some(x + 1), Some(y)),
                (Some(x), y.checked_sub(1)),
                (Some(x), (y + 1 < height).then_some(y + 1)),
            ];
            for (nx, ny) in neighbors {
                let (Some(nx), Some(ny)) = (nx, ny) else {
                    continue;
                };
                if let Some(seen) = visited.get_mut(index(nx, ny)) {
                    if !*seen {
                        *seen = true;
                        queue.push_back((nx, ny));
                    }
                }
            }
        }

        tracing::trace!(
            width,
            height,
            keyed,
            background = ?background,
            "border key applied"
        );
        Ok(rgba)
    }
}
