use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend turns one frame into an ordered list of detections with
/// absolute pixel boxes. The order is whatever the backend produces; the
/// alert policy relies on it only to break exact confidence ties.
///
/// Backends apply their candidate floor (`min_confidence`) themselves and
/// must not return detections below it.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class labels this backend can emit.
    fn labels(&self) -> Vec<String>;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn labels(&self) -> Vec<String> {
        (**self).labels()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}

/// Returns true when `labels` contains `wanted`, ignoring ASCII case.
pub fn covers_label(labels: &[String], wanted: &str) -> bool {
    labels.iter().any(|label| label.eq_ignore_ascii_case(wanted))
}
