use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::detect::Detection;

/// Labels that can raise an alert. Compared case-insensitively.
pub const MONITORED_LABELS: [&str; 2] = ["fire", "smoke"];

pub const DEFAULT_CANDIDATE_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_ALERT_CONFIDENCE: f32 = 0.8;
pub const DEFAULT_HIGH_SEVERITY_CUTOFF: f32 = 0.9;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Thresholds that turn detections into alerts.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertPolicy {
    /// Floor applied by the backend before anything reaches the policy.
    pub candidate_confidence: f32,
    /// A monitored detection at or above this raises an alert.
    pub alert_confidence: f32,
    /// Minimum spacing between two alerts of the same camera.
    pub cooldown: Duration,
    /// Confidence strictly above this is reported as high severity.
    pub high_severity_cutoff: f32,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            candidate_confidence: DEFAULT_CANDIDATE_CONFIDENCE,
            alert_confidence: DEFAULT_ALERT_CONFIDENCE,
            cooldown: DEFAULT_COOLDOWN,
            high_severity_cutoff: DEFAULT_HIGH_SEVERITY_CUTOFF,
        }
    }
}

impl AlertPolicy {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("candidate_confidence", self.candidate_confidence),
            ("alert_confidence", self.alert_confidence),
            ("high_severity_cutoff", self.high_severity_cutoff),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.candidate_confidence > self.alert_confidence {
            return Err(anyhow!(
                "candidate_confidence ({}) must not exceed alert_confidence ({})",
                self.candidate_confidence,
                self.alert_confidence
            ));
        }
        Ok(())
    }

    pub fn severity_for(&self, confidence: f32) -> Severity {
        Severity::from_confidence(confidence, self.high_severity_cutoff)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    /// `High` only when `confidence` is strictly above `cutoff`.
    pub fn from_confidence(confidence: f32, cutoff: f32) -> Self {
        if confidence > cutoff {
            Self::High
        } else {
            Self::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

pub fn is_monitored(label: &str) -> bool {
    MONITORED_LABELS
        .iter()
        .any(|monitored| monitored.eq_ignore_ascii_case(label))
}

/// Highest-confidence fire or smoke detection in backend order.
///
/// Exact ties keep the first one seen.
pub fn best_candidate(detections: &[Detection]) -> Option<&Detection> {
    let mut best: Option<&Detection> = None;
    for detection in detections.iter().filter(|d| is_monitored(d.label())) {
        match best {
            Some(current) if detection.confidence() <= current.confidence() => {}
            _ => best = Some(detection),
        }
    }
    best
}

/// The detection that should raise an alert for this frame, if any.
pub fn evaluate_frame<'a>(detections: &'a [Detection], policy: &AlertPolicy) -> Option<&'a Detection> {
    best_candidate(detections).filter(|best| best.confidence() >= policy.alert_confidence)
}
