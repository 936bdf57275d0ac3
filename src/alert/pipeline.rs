use chrono::{DateTime, Local};
use std::time::Instant;

use super::cooldown::CooldownTracker;
use super::policy::{best_candidate, evaluate_frame, AlertPolicy};
use super::report::{build_report, CameraContext, IncidentId};
use super::retry::{RetryPass, RetryQueue};
use super::sink::{submit_report, ReportSink};
use super::snapshot::SnapshotWriter;
use crate::detect::DetectorBackend;
use crate::frame::Frame;

/// What happened to the alert side of one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Nothing reached the alert threshold.
    None,
    /// A qualifying detection was suppressed by the camera cooldown.
    CoolingDown,
    /// The endpoint accepted the report.
    Delivered(IncidentId),
    /// The alert was accepted but no report reached the endpoint.
    Undelivered,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameOutcome {
    /// A fire or smoke detection was present (at any confidence the backend returned).
    pub detected: bool,
    /// Confidence of the best fire or smoke detection.
    pub confidence: Option<f32>,
    pub alert: AlertOutcome,
    /// The detector failed on this frame; nothing else was evaluated.
    pub inference_failed: bool,
    /// Earlier undelivered reports retried before this frame was analysed.
    pub retried: RetryPass,
}

impl FrameOutcome {
    fn inference_failed(retried: RetryPass) -> Self {
        Self {
            detected: false,
            confidence: None,
            alert: AlertOutcome::None,
            inference_failed: true,
            retried,
        }
    }
}

/// Per-frame detect, filter, cooldown, snapshot and report.
pub struct AlertPipeline<D, S> {
    context: CameraContext,
    policy: AlertPolicy,
    detector: D,
    sink: S,
    snapshots: SnapshotWriter,
    cooldown: CooldownTracker,
    retry: RetryQueue,
    debug: bool,
}

impl<D: DetectorBackend, S: ReportSink> AlertPipeline<D, S> {
    pub fn new(
        context: CameraContext,
        policy: AlertPolicy,
        detector: D,
        sink: S,
        snapshots: SnapshotWriter,
    ) -> Self {
        Self {
            context,
            policy,
            detector,
            sink,
            snapshots,
            cooldown: CooldownTracker::new(),
            retry: RetryQueue::disabled(),
            debug: false,
        }
    }

    pub fn with_retry_queue(mut self, retry: RetryQueue) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cooldown_tracker(mut self, cooldown: CooldownTracker) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Log every raw detection at info level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn context(&self) -> &CameraContext {
        &self.context
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }

    pub fn process_frame(&mut self, frame: &Frame, now: Instant) -> FrameOutcome {
        self.process_frame_at(frame, now, Local::now())
    }

    /// `now` drives the cooldown; `wall_time` stamps the snapshot and report.
    pub fn process_frame_at(
        &mut self,
        frame: &Frame,
        now: Instant,
        wall_time: DateTime<Local>,
    ) -> FrameOutcome {
        let retried = if self.retry.is_empty() {
            RetryPass::default()
        } else {
            self.retry.retry_due(&self.sink, now)
        };

        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!(
                    "camera {}: inference failed, skipping frame: {:#}",
                    self.context.camera_id,
                    err
                );
                return FrameOutcome::inference_failed(retried);
            }
        };

        for detection in &detections {
            let level = if self.debug {
                log::Level::Info
            } else {
                log::Level::Debug
            };
            log::log!(
                level,
                "camera {}: {} {:.3} at {:?}",
                self.context.camera_id,
                detection.label(),
                detection.confidence(),
                detection.bbox().to_array()
            );
        }

        let best = best_candidate(&detections);
        let mut outcome = FrameOutcome {
            detected: best.is_some(),
            confidence: best.map(|d| d.confidence()),
            alert: AlertOutcome::None,
            inference_failed: false,
            retried,
        };

        let Some(candidate) = evaluate_frame(&detections, &self.policy) else {
            return outcome;
        };

        if !self
            .cooldown
            .try_acquire(&self.context.camera_id, now, self.policy.cooldown)
        {
            log::debug!(
                "camera {}: {} {:.2} suppressed by cooldown",
                self.context.camera_id,
                candidate.label(),
                candidate.confidence()
            );
            outcome.alert = AlertOutcome::CoolingDown;
            return outcome;
        }

        log::info!(
            "camera {}: {} detected with confidence {:.2}",
            self.context.camera_id,
            candidate.label(),
            candidate.confidence()
        );

        let snapshot = match self
            .snapshots
            .save(frame, candidate, &self.context.camera_id, &wall_time)
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!(
                    "camera {}: snapshot failed, report not sent: {:#}",
                    self.context.camera_id,
                    err
                );
                outcome.alert = AlertOutcome::Undelivered;
                return outcome;
            }
        };
        log::info!("snapshot saved: {}", snapshot.path.display());

        let report = build_report(
            &self.context,
            candidate,
            &snapshot,
            wall_time,
            self.policy.high_severity_cutoff,
        );
        outcome.alert = match submit_report(&self.sink, &report) {
            Some(id) => AlertOutcome::Delivered(id),
            None => {
                if self.retry.push(report, now) {
                    log::info!(
                        "camera {}: report queued for retry ({} pending)",
                        self.context.camera_id,
                        self.retry.len()
                    );
                }
                AlertOutcome::Undelivered
            }
        };
        outcome
    }
}
