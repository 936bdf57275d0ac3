#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// The model is expected to take a `[1, 3, S, S]` float input in `0..1` and
/// return `[1, 4 + C, N]`: box centre/size rows followed by one score row per
/// class. Boxes are mapped back to frame pixels after per-class NMS.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Vec<String>,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    ///
    /// Class names come from `<model>.labels` (one per line) when present,
    /// otherwise `fire, smoke`.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            labels: load_labels(&labels_path(model_path))?,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = frame.to_rgb_image()?;
        let resized = image::imageops::resize(
            &image,
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );
        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not [1, 4 + C, N]")?;
        let rows = view.shape()[1];
        let anchors = view.shape()[2];
        if rows < 5 {
            return Err(anyhow!("model output has {} rows, expected at least 5", rows));
        }
        let classes = rows - 4;

        let sx = frame.width as f32 / self.input_size as f32;
        let sy = frame.height as f32 / self.input_size as f32;
        let max_x = frame.width as f32;
        let max_y = frame.height as f32;

        let mut candidates: Vec<(usize, f32, BoundingBox)> = Vec::new();
        for i in 0..anchors {
            let (mut best_class, mut best_score) = (0usize, f32::NEG_INFINITY);
            for c in 0..classes {
                let score = view[[0, 4 + c, i]];
                if score > best_score {
                    best_class = c;
                    best_score = score;
                }
            }
            if !best_score.is_finite() || best_score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (view[[0, 0, i]], view[[0, 1, i]], view[[0, 2, i]], view[[0, 3, i]]);
            let x1 = ((cx - w / 2.0) * sx).clamp(0.0, max_x);
            let y1 = ((cy - h / 2.0) * sy).clamp(0.0, max_y);
            let x2 = ((cx + w / 2.0) * sx).clamp(0.0, max_x);
            let y2 = ((cy + h / 2.0) * sy).clamp(0.0, max_y);
            let Ok(bbox) = BoundingBox::new(x1, y1, x2, y2) else {
                continue;
            };
            candidates.push((best_class, best_score.min(1.0), bbox));
        }

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut kept: Vec<(usize, f32, BoundingBox)> = Vec::new();
        for cand in candidates {
            let suppressed = kept
                .iter()
                .any(|k| k.0 == cand.0 && k.2.iou(&cand.2) > NMS_IOU_THRESHOLD);
            if !suppressed {
                kept.push(cand);
            }
        }

        kept.into_iter()
            .map(|(class, score, bbox)| {
                let label = self
                    .labels
                    .get(class)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{}", class));
                Detection::new(label, score, bbox)
            })
            .collect()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}

fn labels_path(model_path: &Path) -> PathBuf {
    let mut name = model_path.as_os_str().to_owned();
    name.push(".labels");
    PathBuf::from(name)
}

fn load_labels(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(vec!["fire".to_string(), "smoke".to_string()]);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels file {}", path.display()))?;
    let labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        return Err(anyhow!("labels file {} is empty", path.display()));
    }
    Ok(labels)
}
