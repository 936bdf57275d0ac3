//! Annotated evidence snapshots.
//!
//! The detection is drawn onto a copy of the frame (box plus a
//! `"<label>: <confidence>"` caption above it), encoded as JPEG, written to
//! the snapshot directory and base64-encoded for the incident report.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::detect::Detection;
use crate::frame::Frame;

pub const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

const FIRE_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
const SMOKE_COLOUR: Rgb<u8> = Rgb([255, 255, 0]);
const OTHER_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;
const MAX_NAME_SUFFIX: u32 = 1000;

/// A persisted snapshot and its base64 payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub image_base64: String,
}

#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    dir: PathBuf,
    jpeg_quality: u8,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Annotate, encode and write one snapshot. The frame is left untouched.
    ///
    /// A second snapshot for the same camera within the same second gets a
    /// `_<n>` suffix instead of replacing the first file.
    pub fn save(
        &self,
        frame: &Frame,
        detection: &Detection,
        camera_id: &str,
        timestamp: &DateTime<Local>,
    ) -> Result<Snapshot> {
        let annotated = annotate(frame, detection)?;
        let jpeg = encode_jpeg(&annotated, self.jpeg_quality)?;

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create snapshot dir {}", self.dir.display()))?;
        let path = write_new_file(&self.dir, &snapshot_file_name(camera_id, timestamp), &jpeg)?;

        Ok(Snapshot {
            path,
            image_base64: BASE64.encode(&jpeg),
        })
    }
}

/// `detection_<camera_id>_<YYYYmmdd_HHMMSS>.jpg` (before any collision suffix)
pub fn snapshot_file_name(camera_id: &str, timestamp: &DateTime<Local>) -> String {
    let safe_id: String = camera_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "detection_{}_{}.jpg",
        safe_id,
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

fn write_new_file(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let stem = file_name.strip_suffix(".jpg").unwrap_or(file_name);
    for n in 0..MAX_NAME_SUFFIX {
        let path = if n == 0 {
            dir.join(file_name)
        } else {
            dir.join(format!("{}_{}.jpg", stem, n))
        };
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("create snapshot {}", path.display()))
            }
        };
        file.write_all(bytes)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        return Ok(path);
    }
    Err(anyhow!(
        "no free snapshot name for {} in {}",
        file_name,
        dir.display()
    ))
}

pub fn label_colour(label: &str) -> Rgb<u8> {
    if label.eq_ignore_ascii_case("fire") {
        FIRE_COLOUR
    } else if label.eq_ignore_ascii_case("smoke") {
        SMOKE_COLOUR
    } else {
        OTHER_COLOUR
    }
}

pub fn caption(detection: &Detection) -> String {
    format!("{}: {:.2}", detection.label(), detection.confidence())
}

pub fn annotate(frame: &Frame, detection: &Detection) -> Result<RgbImage> {
    let mut image = frame.to_rgb_image()?;
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("cannot annotate an empty frame"));
    }
    let colour = label_colour(detection.label());
    let bbox = detection.bbox();
    // Edges far outside the frame collapse to just past the border, where
    // every inset of the outline stays off-canvas.
    let (width, height) = image.dimensions();
    let (x1, y1) = (clamp_coord(bbox.x1, width), clamp_coord(bbox.y1, height));
    let (x2, y2) = (clamp_coord(bbox.x2, width), clamp_coord(bbox.y2, height));

    for inset in 0..BOX_THICKNESS {
        draw_rectangle(&mut image, x1 + inset, y1 + inset, x2 - inset, y2 - inset, colour);
    }

    let label_y = (y1 - 10 - GLYPH_HEIGHT).max(0);
    draw_label(&mut image, x1.max(0), label_y, &caption(detection), colour);
    Ok(image)
}

fn clamp_coord(value: f32, extent: u32) -> i32 {
    let low = -BOX_THICKNESS;
    let high = extent.min(i32::MAX as u32 / 2) as i32 + BOX_THICKNESS - 1;
    (value.round() as i32).clamp(low, high)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, colour: Rgb<u8>) {
    if left > right || top > bottom {
        return;
    }
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    let (l, r) = (left.clamp(0, max_x), right.clamp(0, max_x));
    let (t, b) = (top.clamp(0, max_y), bottom.clamp(0, max_y));

    for x in l..=r {
        for y in [top, bottom] {
            if (0..=max_y).contains(&y) {
                image.put_pixel(x as u32, y as u32, colour);
            }
        }
    }
    for y in t..=b {
        for x in [left, right] {
            if (0..=max_x).contains(&x) {
                image.put_pixel(x as u32, y as u32, colour);
            }
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, colour: Rgb<u8>) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            image.put_pixel(px as u32, py as u32, colour);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'E' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111]),
        'F' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000]),
        'I' => Some([0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        'K' => Some([0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'O' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        'S' => Some([0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        ':' => Some([0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ' ' => Some([0; 7]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use chrono::TimeZone;

    fn detection(label: &str) -> Detection {
        let bbox = BoundingBox::new(8.0, 20.0, 40.0, 44.0).expect("bbox");
        Detection::new(label, 0.87, bbox).expect("detection")
    }

    fn timestamp() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 1, 9, 5, 7)
            .single()
            .expect("timestamp")
    }

    #[test]
    fn file_name_matches_layout() {
        assert_eq!(
            snapshot_file_name("cam-1", &timestamp()),
            "detection_cam-1_20240301_090507.jpg"
        );
        assert_eq!(
            snapshot_file_name("lobby/east", &timestamp()),
            "detection_lobby_east_20240301_090507.jpg"
        );
    }

    #[test]
    fn box_colour_depends_on_label() -> Result<()> {
        let frame = Frame::filled(64, 48, [0, 0, 0])?;
        let fire = annotate(&frame, &detection("fire"))?;
        assert_eq!(*fire.get_pixel(8, 30), FIRE_COLOUR);
        let smoke = annotate(&frame, &detection("Smoke"))?;
        assert_eq!(*smoke.get_pixel(40, 30), SMOKE_COLOUR);
        // Interior of the box is not painted.
        assert_eq!(*fire.get_pixel(24, 32), Rgb([0, 0, 0]));
        // Source frame is unchanged.
        assert_eq!(frame.pixel(8, 30), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn caption_is_drawn_above_the_box() -> Result<()> {
        let frame = Frame::filled(64, 48, [0, 0, 0])?;
        let image = annotate(&frame, &detection("fire"))?;
        let painted = (0..20u32)
            .flat_map(|y| (0..64u32).map(move |x| (x, y)))
            .filter(|&(x, y)| *image.get_pixel(x, y) == FIRE_COLOUR)
            .count();
        assert!(painted > 0);
        assert_eq!(caption(&detection("fire")), "fire: 0.87");
        Ok(())
    }

    #[test]
    fn out_of_frame_box_is_clipped() -> Result<()> {
        let frame = Frame::filled(16, 16, [0, 0, 0])?;
        let bbox = BoundingBox::new(-5.0, -5.0, 100.0, 100.0)?;
        let detection = Detection::new("fire", 0.9, bbox)?;
        let image = annotate(&frame, &detection)?;
        assert_eq!(image.dimensions(), (16, 16));
        Ok(())
    }

    #[test]
    fn extreme_box_is_clipped_without_overflow() -> Result<()> {
        let frame = Frame::filled(32, 32, [0, 0, 0])?;
        let bbox = BoundingBox::new(3e9, -3e9, 4e9, 10.0)?;
        let detection = Detection::new("fire", 0.95, bbox)?;
        let image = annotate(&frame, &detection)?;
        assert_eq!(image.dimensions(), (32, 32));

        let wide = BoundingBox::new(-4e9, -4e9, 4e9, 4e9)?;
        let image = annotate(&frame, &Detection::new("smoke", 0.9, wide)?)?;
        // Every edge lies off-canvas, so only the caption is painted.
        assert_eq!(*image.get_pixel(16, 16), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(0, 31), Rgb([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn same_second_snapshots_get_distinct_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = SnapshotWriter::new(dir.path());
        let frame = Frame::filled(16, 16, [0, 0, 0])?;
        let first = writer.save(&frame, &detection("fire"), "cam-1", &timestamp())?;
        let second = writer.save(&frame, &detection("smoke"), "cam-1", &timestamp())?;

        assert!(first.path.ends_with("detection_cam-1_20240301_090507.jpg"));
        assert!(second.path.ends_with("detection_cam-1_20240301_090507_1.jpg"));
        assert_eq!(BASE64.decode(&first.image_base64)?, std::fs::read(&first.path)?);
        assert_eq!(BASE64.decode(&second.image_base64)?, std::fs::read(&second.path)?);
        Ok(())
    }

    #[test]
    fn save_writes_jpeg_and_base64() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = SnapshotWriter::new(dir.path().join("snapshots"));
        let frame = Frame::filled(64, 48, [30, 30, 30])?;
        let snapshot = writer.save(&frame, &detection("fire"), "cam-1", &timestamp())?;

        assert!(snapshot.path.ends_with("detection_cam-1_20240301_090507.jpg"));
        let bytes = std::fs::read(&snapshot.path)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(BASE64.decode(&snapshot.image_base64)?, bytes);
        Ok(())
    }

    #[test]
    fn save_fails_when_dir_is_a_file() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        let writer = SnapshotWriter::new(file.path());
        let frame = Frame::filled(8, 8, [0, 0, 0])?;
        assert!(writer
            .save(&frame, &detection("fire"), "cam-1", &timestamp())
            .is_err());
        Ok(())
    }
}
