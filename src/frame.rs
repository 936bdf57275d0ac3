//! Captured frame container.
//!
//! - `Frame`: owned RGB8 pixel buffer with dimensions and capture instant.
//!
//! Sources hand frames to the monitor loop one at a time. The alert pipeline
//! borrows the frame for inference and only clones pixels when it renders an
//! annotated snapshot, so the original frame is never modified.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::Instant;

/// Bytes per pixel for the RGB8 layout used everywhere in the crate.
pub const RGB_CHANNELS: usize = 3;

/// A single decoded frame in packed RGB8 (row-major, no padding).
pub struct Frame {
    pixels: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Monotonic capture instant (for pacing and health, not exported).
    captured_at: Instant,
}

impl Frame {
    /// Wrap a packed RGB8 buffer. Fails on a zero dimension or when the
    /// length does not match the dimensions.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    /// Solid-colour frame, mostly useful for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = expected_len(width, height)?;
        let mut pixels = Vec::with_capacity(len);
        for _ in 0..(len / RGB_CHANNELS) {
            pixels.extend_from_slice(&rgb);
        }
        Self::from_rgb(pixels, width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[cfg(test)]
    pub(crate) fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// RGB value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    /// Copy the pixels into an `image` buffer for drawing and encoding.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame dimensions must be non-zero, got {}x{}", width, height));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
