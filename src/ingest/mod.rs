//! Frame ingestion sources.
//!
//! This module provides the capture side of the monitor:
//! - HTTP MJPEG / JPEG snapshot streams (IP cameras, phone camera apps)
//! - RTSP streams and local video files (feature: ingest-ffmpeg)
//! - Local USB/V4L2 devices by index (feature: ingest-v4l2)
//! - Synthetic `stub://` source (testing, dry runs)
//!
//! Every source implements `FrameSource`. The monitor loop acquires a source
//! through `CaptureGuard`, which releases it on every exit path.

mod fallback;
pub mod http;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
#[cfg(feature = "ingest-ffmpeg")]
pub mod stream;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use anyhow::{anyhow, Result};
use url::Url;

use crate::frame::Frame;

pub use fallback::{alternative_urls, FallbackSource};
pub use http::HttpSource;
#[cfg(feature = "ingest-ffmpeg")]
pub use stream::StreamSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Capture capability consumed by the monitor loop.
pub trait FrameSource {
    /// Open the underlying device or stream.
    fn open(&mut self) -> Result<()>;

    /// Read the next frame.
    ///
    /// `Ok(None)` means a finite source (e.g. a file) has ended. `Err` is a
    /// read failure; the caller decides how many consecutive ones to tolerate.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the device or stream. Must be safe to call more than once.
    fn release(&mut self);

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        (**self).read_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Capture settings shared by all sources.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureSettings {
    /// Preferred frame width (devices, synthetic frames).
    pub width: u32,
    /// Preferred frame height (devices, synthetic frames).
    pub height: u32,
    /// Target frame rate. Network sources decimate to this rate.
    pub target_fps: u32,
    /// Upper bound on a single blocking read from a network source.
    pub read_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 10,
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// Parsed stream source identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Local capture device by index (`0` -> `/dev/video0`).
    Device(u32),
    /// HTTP(S) MJPEG stream or JPEG snapshot endpoint.
    Http(String),
    /// Anything FFmpeg can open: RTSP/RTMP URLs, local video files.
    Stream(String),
    /// Synthetic frames (`stub://...`).
    Synthetic(String),
}

impl SourceSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("stream source must not be empty"));
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            let index = raw
                .parse()
                .map_err(|_| anyhow!("device index '{}' is out of range", raw))?;
            return Ok(Self::Device(index));
        }
        if raw.starts_with("stub://") {
            return Ok(Self::Synthetic(raw.to_string()));
        }
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Self::Http(raw.to_string())),
            _ => Ok(Self::Stream(raw.to_string())),
        }
    }

    /// Human-readable identifier for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Device(index) => format!("/dev/video{}", index),
            Self::Http(url) | Self::Stream(url) | Self::Synthetic(url) => url.clone(),
        }
    }
}

/// Build an unopened source for `spec`.
pub fn build_source(spec: &SourceSpec, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    match spec {
        SourceSpec::Synthetic(url) => Ok(Box::new(SyntheticSource::new(url, settings)?)),
        SourceSpec::Http(url) => Ok(Box::new(HttpSource::new(url, settings)?)),
        SourceSpec::Device(index) => build_device(*index, settings),
        SourceSpec::Stream(url) => build_stream(url, settings),
    }
}

#[cfg(feature = "ingest-v4l2")]
fn build_device(index: u32, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    let config = v4l2::V4l2Config {
        device: format!("/dev/video{}", index),
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    };
    Ok(Box::new(V4l2Source::new(config)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn build_device(index: u32, _settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "local device {} requires the ingest-v4l2 feature",
        index
    ))
}

#[cfg(feature = "ingest-ffmpeg")]
fn build_stream(url: &str, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(StreamSource::new(url, settings)))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn build_stream(url: &str, _settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!("stream source '{}' requires the ingest-ffmpeg feature", url))
}

/// Scoped acquisition of an open source.
///
/// `open` either returns a guard over an opened source or releases whatever
/// was partially acquired and returns the error. Dropping the guard releases
/// the source.
pub struct CaptureGuard<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
}

impl<'a, S: FrameSource + ?Sized> CaptureGuard<'a, S> {
    pub fn open(source: &'a mut S) -> Result<Self> {
        if let Err(err) = source.open() {
            source.release();
            return Err(err);
        }
        Ok(Self { source })
    }
}

impl<S: FrameSource + ?Sized> Deref for CaptureGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.source
    }
}

impl<S: FrameSource + ?Sized> DerefMut for CaptureGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.source
    }
}

impl<S: FrameSource + ?Sized> Drop for CaptureGuard<'_, S> {
    fn drop(&mut self) {
        self.source.release();
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}
