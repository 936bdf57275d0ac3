//! fire-sentinel
//!
//! Watches a camera or video stream for fire and smoke and raises incidents.
//!
//! # Architecture
//!
//! Each analysed frame goes through one decision pipeline:
//!
//! 1. **Detect**: a `DetectorBackend` returns labelled boxes above the
//!    candidate floor.
//! 2. **Filter**: only `fire`/`smoke` count; the most confident one wins.
//! 3. **Confirm**: it must reach the alert threshold.
//! 4. **Deduplicate**: one alert per camera per cooldown window.
//! 5. **Evidence**: an annotated JPEG is written to the snapshot directory.
//! 6. **Report**: the incident is POSTed to the web API; failures are logged
//!    and monitoring continues.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames
//! - `ingest`: frame sources (HTTP MJPEG, RTSP/files, V4L2, synthetic)
//! - `detect`: detector backends (heuristic, scripted, ONNX via tract)
//! - `alert`: policy, cooldown, snapshots, reports, delivery
//! - `monitor`: the per-camera session loop
//! - `config`: file and environment configuration

pub mod alert;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod ui;

pub use alert::{
    AlertOutcome, AlertPipeline, AlertPolicy, CameraContext, FrameOutcome, HttpReportSink,
    IncidentId, IncidentReport, ReportSink, Severity, SnapshotWriter,
};
pub use config::MonitorConfig;
pub use detect::{select_backend, BoundingBox, Detection, DetectorBackend, DetectorSettings};
pub use frame::Frame;
pub use ingest::{build_source, CaptureGuard, FallbackSource, FrameSource, SourceSpec};
pub use monitor::{MonitorSession, MonitorSettings, SessionEnd, SessionError, SessionStats};
