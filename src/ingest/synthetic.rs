//! Synthetic frame source (`stub://`).
//!
//! - `stub://<name>`: textured background, never ends.
//! - names containing `fire` paint a flame-coloured block in the frame centre.
//! - `stub://unavailable`: `open` fails.
//! - `?frames=N`: the stream ends after N frames.

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use url::Url;

use super::{CaptureSettings, FrameSource, SourceStats};
use crate::frame::Frame;

const FLAME_RGB: [u8; 3] = [250, 150, 30];

pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    flame: bool,
    unavailable: bool,
    frame_limit: Option<u64>,
    frame_count: u64,
    opened: bool,
    releases: u32,
}

impl SyntheticSource {
    pub fn new(url: &str, settings: &CaptureSettings) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parse synthetic url {}", url))?;
        if parsed.scheme() != "stub" {
            return Err(anyhow!("synthetic sources use the stub:// scheme"));
        }
        let name = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        let frame_limit = parsed
            .query_pairs()
            .find(|(key, _)| key == "frames")
            .map(|(_, value)| {
                value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("stub frames must be an integer, got '{}'", value))
            })
            .transpose()?;

        Ok(Self {
            url: url.to_string(),
            width: settings.width,
            height: settings.height,
            flame: name.contains("fire"),
            unavailable: name == "unavailable",
            frame_limit,
            frame_count: 0,
            opened: false,
            releases: 0,
        })
    }

    /// How many times `release` has been called.
    pub fn release_count(&self) -> u32 {
        self.releases
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = vec![0u8; w * h * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let base = ((i % w + i / w + self.frame_count as usize) % 96) as u8 + 20;
            let noise: u8 = rng.gen_range(0..8);
            px.copy_from_slice(&[base + noise, base + noise, base + noise]);
        }
        if self.flame {
            let (x0, x1) = (w * 3 / 8, w * 5 / 8);
            let (y0, y1) = (h * 3 / 8, h * 5 / 8);
            for y in y0..y1 {
                for x in x0..x1 {
                    let idx = (y * w + x) * 3;
                    pixels[idx..idx + 3].copy_from_slice(&FLAME_RGB);
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<()> {
        if self.unavailable {
            return Err(anyhow!("synthetic source {} is unavailable", self.url));
        }
        self.opened = true;
        log::info!("SyntheticSource: connected to {}", self.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if !self.opened {
            return Err(anyhow!("synthetic source not opened; call open() first"));
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let pixels = self.generate_pixels();
        self.frame_count += 1;
        Frame::from_rgb(pixels, self.width, self.height).map(Some)
    }

    fn release(&mut self) {
        self.opened = false;
        self.releases += 1;
    }

    fn is_healthy(&self) -> bool {
        self.opened
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectorBackend, HeuristicBackend};

    fn settings() -> CaptureSettings {
        CaptureSettings {
            width: 64,
            height: 48,
            ..CaptureSettings::default()
        }
    }

    #[test]
    fn produces_frames_of_configured_size() -> Result<()> {
        let mut source = SyntheticSource::new("stub://lobby", &settings())?;
        source.open()?;
        let frame = source.read_frame()?.expect("frame");
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn frame_limit_ends_stream() -> Result<()> {
        let mut source = SyntheticSource::new("stub://lobby?frames=2", &settings())?;
        source.open()?;
        assert!(source.read_frame()?.is_some());
        assert!(source.read_frame()?.is_some());
        assert!(source.read_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn fire_scene_trips_heuristic_backend() -> Result<()> {
        let mut source = SyntheticSource::new("stub://kitchen-fire", &settings())?;
        source.open()?;
        let frame = source.read_frame()?.expect("frame");
        let detections = HeuristicBackend::new().detect(&frame)?;
        assert!(!detections.is_empty());

        let mut calm = SyntheticSource::new("stub://kitchen", &settings())?;
        calm.open()?;
        let frame = calm.read_frame()?.expect("frame");
        assert!(HeuristicBackend::new().detect(&frame)?.is_empty());
        Ok(())
    }

    #[test]
    fn read_before_open_fails() -> Result<()> {
        let mut source = SyntheticSource::new("stub://lobby", &settings())?;
        assert!(source.read_frame().is_err());
        Ok(())
    }
}
