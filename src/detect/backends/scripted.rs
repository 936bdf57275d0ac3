use std::collections::VecDeque;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// One scripted frame: either a list of detections or an inference failure.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Detections(Vec<Detection>),
    Fail(String),
}

/// Backend that replays a fixed sequence of results, one per `detect` call.
///
/// Once the script is exhausted every further frame yields no detections.
/// Used for dry runs against a real endpoint and for pipeline tests.
pub struct ScriptedBackend {
    steps: VecDeque<ScriptStep>,
    labels: Vec<String>,
    min_confidence: f32,
    calls: u64,
}

#[derive(Debug, Deserialize)]
struct ScriptedDetectionFile {
    label: String,
    confidence: f32,
    bbox: [f32; 4],
}

impl ScriptedBackend {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            labels: vec!["fire".to_string(), "smoke".to_string()],
            min_confidence: 0.0,
            calls: 0,
        }
    }

    /// Script where every frame succeeds with the given detections.
    pub fn from_frames(frames: impl IntoIterator<Item = Vec<Detection>>) -> Self {
        Self::new(frames.into_iter().map(ScriptStep::Detections))
    }

    /// Load a JSON script: an array of frames, each an array of
    /// `{"label", "confidence", "bbox": [x1, y1, x2, y2]}` objects.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid detection script {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let frames: Vec<Vec<ScriptedDetectionFile>> =
            serde_json::from_str(raw).map_err(|e| anyhow!("parse detection script: {}", e))?;
        let mut steps = Vec::with_capacity(frames.len());
        for frame in frames {
            let mut detections = Vec::with_capacity(frame.len());
            for entry in frame {
                let [x1, y1, x2, y2] = entry.bbox;
                let bbox = BoundingBox::new(x1, y1, x2, y2)?;
                detections.push(Detection::new(entry.label, entry.confidence, bbox)?);
            }
            steps.push(ScriptStep::Detections(detections));
        }
        Ok(Self::new(steps))
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Number of frames this backend has been asked to analyse.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.steps.pop_front() {
            Some(ScriptStep::Detections(detections)) => Ok(detections
                .into_iter()
                .filter(|d| d.confidence() >= self.min_confidence)
                .collect()),
            Some(ScriptStep::Fail(reason)) => Err(anyhow!("scripted inference failure: {}", reason)),
            None => Ok(Vec::new()),
        }
    }
}
