use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::policy::Severity;
use super::snapshot::Snapshot;
use crate::detect::Detection;

/// Identity of the monitored camera. Built once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraContext {
    pub camera_id: String,
    pub camera_name: String,
    pub location: String,
}

impl CameraContext {
    pub fn new(
        camera_id: impl Into<String>,
        camera_name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            camera_name: camera_name.into(),
            location: location.into(),
        }
    }
}

/// JSON body posted to the incident endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentReport {
    pub camera_id: String,
    pub camera_name: String,
    pub location: String,
    pub detection_type: String,
    pub confidence: f32,
    /// ISO-8601 local time with offset.
    pub timestamp: String,
    /// Base64 of the annotated JPEG.
    pub image: String,
    pub snapshot_path: String,
    pub bbox: [f32; 4],
    pub severity: Severity,
}

/// Identifier the endpoint assigned to a stored incident.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IncidentId(String);

impl IncidentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn format_timestamp(timestamp: &DateTime<Local>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, false)
}

pub fn build_report(
    ctx: &CameraContext,
    detection: &Detection,
    snapshot: &Snapshot,
    timestamp: DateTime<Local>,
    high_severity_cutoff: f32,
) -> IncidentReport {
    IncidentReport {
        camera_id: ctx.camera_id.clone(),
        camera_name: ctx.camera_name.clone(),
        location: ctx.location.clone(),
        detection_type: detection.label().to_ascii_lowercase(),
        confidence: detection.confidence(),
        timestamp: format_timestamp(&timestamp),
        image: snapshot.image_base64.clone(),
        snapshot_path: snapshot.path.display().to_string(),
        bbox: detection.bbox().to_array(),
        severity: Severity::from_confidence(detection.confidence(), high_severity_cutoff),
    }
}
