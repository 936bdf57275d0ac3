pub mod heuristic;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

use std::path::PathBuf;

use anyhow::{anyhow, Result};

pub use heuristic::HeuristicBackend;
pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use super::backend::DetectorBackend;

pub const DEFAULT_BACKEND: &str = "heuristic";
pub const DEFAULT_MODEL_PATH: &str = "best.onnx";
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Settings used to construct a detector backend.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    /// Backend name: `heuristic`, `scripted`, or `tract`.
    pub backend: String,
    /// Model file (`tract`) or detection script (`scripted`).
    pub model_path: PathBuf,
    /// Candidate floor applied inside the backend.
    pub min_confidence: f32,
    /// Square model input edge in pixels (`tract`).
    pub input_size: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            min_confidence: 0.5,
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

/// Build the backend named in `settings`.
pub fn select_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.trim().to_ascii_lowercase().as_str() {
        "heuristic" => Ok(Box::new(
            HeuristicBackend::new().with_min_confidence(settings.min_confidence),
        )),
        "scripted" => Ok(Box::new(
            ScriptedBackend::from_file(&settings.model_path)?
                .with_min_confidence(settings.min_confidence),
        )),
        "tract" => select_tract(settings),
        other => Err(anyhow!(
            "unknown detector backend '{}'; expected heuristic, scripted or tract",
            other
        )),
    }
}

#[cfg(feature = "backend-tract")]
fn select_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let backend = TractBackend::new(&settings.model_path, settings.input_size)?
        .with_threshold(settings.min_confidence);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn select_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("the tract backend requires the backend-tract feature"))
}
