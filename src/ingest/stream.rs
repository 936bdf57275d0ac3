//! FFmpeg-backed stream source.
//!
//! Opens anything libavformat understands: RTSP/RTMP cameras and local video
//! files. Frames are scaled to packed RGB24 in-memory.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::{health_grace, CaptureSettings, FrameSource, SourceStats};
use crate::frame::Frame;

struct OpenStream {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

pub struct StreamSource {
    url: String,
    target_fps: u32,
    read_timeout: Duration,
    state: Option<OpenStream>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

impl StreamSource {
    pub fn new(url: &str, settings: &CaptureSettings) -> Self {
        Self {
            url: url.to_string(),
            target_fps: settings.target_fps,
            read_timeout: settings.read_timeout,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        }
    }

    fn open_input(&self) -> Result<OpenStream> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut options = ffmpeg::Dictionary::new();
        if self.url.starts_with("rtsp://") {
            options.set("rtsp_transport", "tcp");
        }
        options.set("stimeout", &self.read_timeout.as_micros().to_string());
        let input = ffmpeg::format::input_with_dictionary(&self.url, options)
            .with_context(|| format!("failed to open stream '{}' with ffmpeg", self.url))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("stream has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(OpenStream {
            input,
            stream_index,
            decoder,
            scaler,
        })
    }
}

impl FrameSource for StreamSource {
    fn open(&mut self) -> Result<()> {
        let state = self.open_input().map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("StreamSource: connected to {} (ffmpeg)", self.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("stream not opened; call open() first"))?;

        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb_frame = ffmpeg::frame::Video::empty();

        for (stream, packet) in state.input.packets() {
            if stream.index() != state.stream_index {
                continue;
            }

            state
                .decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;

            if state.decoder.receive_frame(&mut decoded).is_ok() {
                state
                    .scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;

                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                return Frame::from_rgb(pixels, width, height).map(Some);
            }
        }

        log::info!("StreamSource: {} reached end of stream", self.url);
        Ok(None)
    }

    fn release(&mut self) {
        self.state = None;
        self.connected_at = None;
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
