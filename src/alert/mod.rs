//! Detection-to-alert decision pipeline.
//!
//! - `policy`: thresholds, fire/smoke filtering, severity.
//! - `cooldown`: per-camera alert spacing.
//! - `snapshot`: annotated JPEG evidence on disk.
//! - `report`: the incident JSON body.
//! - `sink`: delivery to the incident endpoint.
//! - `retry`: optional bounded redelivery of failed reports.
//! - `pipeline`: per-frame orchestration of all of the above.

pub mod cooldown;
pub mod pipeline;
pub mod policy;
pub mod report;
pub mod retry;
pub mod sink;
pub mod snapshot;

pub use cooldown::{CooldownTracker, SharedCooldownTracker};
pub use pipeline::{AlertOutcome, AlertPipeline, FrameOutcome};
pub use policy::{best_candidate, evaluate_frame, AlertPolicy, Severity, MONITORED_LABELS};
pub use report::{build_report, CameraContext, IncidentId, IncidentReport};
pub use retry::{RetryPass, RetryQueue};
pub use sink::{submit_report, HttpReportSink, ReportSink, SubmitError};
pub use snapshot::{Snapshot, SnapshotWriter};
