//! Monitoring session loop.
//!
//! One session owns one camera: it opens the source through `CaptureGuard`,
//! reads frames in order, hands every `frame_stride`-th frame to the alert
//! pipeline, and stops on Ctrl-C, end of stream, or after too many
//! consecutive read failures. The source is released on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::alert::{AlertOutcome, AlertPipeline, FrameOutcome, ReportSink};
use crate::detect::DetectorBackend;
use crate::ingest::{CaptureGuard, FrameSource};

pub const DEFAULT_FRAME_STRIDE: u32 = 1;
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_READ_FAILURES: u32 = 10;
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(5);

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorSettings {
    /// Analyse every Nth frame (1 = every frame).
    pub frame_stride: u32,
    /// Pause after each successfully read frame.
    pub frame_interval: Duration,
    /// Consecutive read failures tolerated before the session ends.
    pub max_consecutive_failures: u32,
    /// Pause after a failed read.
    pub failure_backoff: Duration,
    /// Spacing of the periodic status line.
    pub status_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            frame_stride: DEFAULT_FRAME_STRIDE,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_READ_FAILURES,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
            status_interval: DEFAULT_STATUS_INTERVAL,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open capture {location}: {reason}")]
    CaptureOpen { location: String, reason: String },
    #[error("giving up after {failures} consecutive read failures (last: {last_error})")]
    ReadFailuresExhausted { failures: u32, last_error: String },
}

/// Why a session ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Interrupted,
    EndOfStream,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_read: u64,
    pub frames_analysed: u64,
    pub read_failures: u64,
    pub inference_failures: u64,
    /// Analysed frames containing a fire or smoke detection.
    pub detections: u64,
    /// Reports the endpoint accepted, on first attempt or from the retry queue.
    pub alerts_delivered: u64,
    /// Accepted alerts whose report has not reached the endpoint.
    pub alerts_undelivered: u64,
    pub alerts_suppressed: u64,
    /// Subset of `alerts_delivered` that needed the retry queue.
    pub alerts_redelivered: u64,
    pub retries_abandoned: u64,
}

impl SessionStats {
    fn record(&mut self, outcome: &FrameOutcome) {
        self.frames_analysed += 1;
        if outcome.inference_failed {
            self.inference_failures += 1;
        }
        if outcome.detected {
            self.detections += 1;
        }
        match outcome.alert {
            AlertOutcome::None => {}
            AlertOutcome::CoolingDown => self.alerts_suppressed += 1,
            AlertOutcome::Delivered(_) => self.alerts_delivered += 1,
            AlertOutcome::Undelivered => self.alerts_undelivered += 1,
        }

        let redelivered = outcome.retried.delivered.len() as u64;
        self.alerts_delivered += redelivered;
        self.alerts_redelivered += redelivered;
        self.alerts_undelivered = self.alerts_undelivered.saturating_sub(redelivered);
        self.retries_abandoned += outcome.retried.abandoned as u64;
    }

    pub fn log_summary(&self, camera_id: &str) {
        log::info!(
            "session summary for camera {}: frames read={} analysed={} detections={} \
             alerts delivered={} (retried={}) undelivered={} suppressed={} abandoned={} \
             read failures={} inference failures={}",
            camera_id,
            self.frames_read,
            self.frames_analysed,
            self.detections,
            self.alerts_delivered,
            self.alerts_redelivered,
            self.alerts_undelivered,
            self.alerts_suppressed,
            self.retries_abandoned,
            self.read_failures,
            self.inference_failures
        );
    }
}

pub struct MonitorSession {
    settings: MonitorSettings,
    shutdown: Arc<AtomicBool>,
    stats: SessionStats,
}

impl MonitorSession {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: SessionStats::default(),
        }
    }

    /// Flag that stops the loop when set (wired to Ctrl-C by the binary).
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn run<S, D, K>(
        &mut self,
        source: &mut S,
        pipeline: &mut AlertPipeline<D, K>,
    ) -> Result<SessionEnd, SessionError>
    where
        S: FrameSource + ?Sized,
        D: DetectorBackend,
        K: ReportSink,
    {
        let location = source.stats().source;
        let mut capture =
            CaptureGuard::open(source).map_err(|err| SessionError::CaptureOpen {
                location: location.clone(),
                reason: format!("{:#}", err),
            })?;
        log::info!(
            "monitoring camera {} ({}) at {} from {}",
            pipeline.context().camera_id,
            pipeline.context().camera_name,
            pipeline.context().location,
            location
        );

        let stride = u64::from(self.settings.frame_stride.max(1));
        let mut consecutive_failures = 0u32;
        let mut last_status = Instant::now();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                log::info!("shutdown requested; stopping camera {}", pipeline.context().camera_id);
                return Ok(SessionEnd::Interrupted);
            }

            match capture.read_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    self.stats.frames_read += 1;
                    if (self.stats.frames_read - 1) % stride == 0 {
                        let outcome = pipeline.process_frame(&frame, Instant::now());
                        self.stats.record(&outcome);
                    }
                }
                Ok(None) => {
                    log::info!("{} reached end of stream", location);
                    return Ok(SessionEnd::EndOfStream);
                }
                Err(err) => {
                    consecutive_failures += 1;
                    self.stats.read_failures += 1;
                    log::warn!(
                        "failed to read frame from {} ({}/{}): {:#}",
                        location,
                        consecutive_failures,
                        self.settings.max_consecutive_failures,
                        err
                    );
                    if consecutive_failures > self.settings.max_consecutive_failures {
                        return Err(SessionError::ReadFailuresExhausted {
                            failures: consecutive_failures,
                            last_error: format!("{:#}", err),
                        });
                    }
                    self.pause(self.settings.failure_backoff);
                    continue;
                }
            }

            if last_status.elapsed() >= self.settings.status_interval {
                let source_stats = capture.stats();
                log::info!(
                    "source health={} frames={} analysed={} alerts={} source={}",
                    capture.is_healthy(),
                    source_stats.frames_captured,
                    self.stats.frames_analysed,
                    self.stats.alerts_delivered,
                    source_stats.source
                );
                last_status = Instant::now();
            }

            self.pause(self.settings.frame_interval);
        }
    }

    /// Sleep for `duration`, waking early when shutdown is requested.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{
        AlertPolicy, CameraContext, IncidentId, IncidentReport, RetryQueue, SnapshotWriter,
        SubmitError,
    };
    use crate::detect::{BoundingBox, Detection, ScriptedBackend};
    use crate::frame::Frame;
    use crate::ingest::SourceStats;
    use anyhow::{anyhow, Result};
    use std::cell::Cell;
    use std::collections::VecDeque;

    enum Read {
        Frame,
        Fail,
    }

    struct MockSource {
        script: VecDeque<Read>,
        fail_open: bool,
        opens: u32,
        reads: u32,
        releases: u32,
    }

    impl MockSource {
        fn new(script: impl IntoIterator<Item = Read>) -> Self {
            Self {
                script: script.into_iter().collect(),
                fail_open: false,
                opens: 0,
                reads: 0,
                releases: 0,
            }
        }

        fn frames(count: usize) -> Self {
            Self::new((0..count).map(|_| Read::Frame))
        }
    }

    impl FrameSource for MockSource {
        fn open(&mut self) -> Result<()> {
            self.opens += 1;
            if self.fail_open {
                return Err(anyhow!("camera offline"));
            }
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Option<Frame>> {
            self.reads += 1;
            match self.script.pop_front() {
                Some(Read::Frame) => Frame::filled(16, 16, [10, 10, 10]).map(Some),
                Some(Read::Fail) => Err(anyhow!("decode error")),
                None => Ok(None),
            }
        }

        fn release(&mut self) {
            self.releases += 1;
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: u64::from(self.reads),
                source: "mock://camera".to_string(),
            }
        }
    }

    struct AcceptingSink;

    impl ReportSink for AcceptingSink {
        fn submit(&self, _report: &IncidentReport) -> Result<IncidentId, SubmitError> {
            Ok(IncidentId::new("inc-1"))
        }
    }

    /// Refuses the first `failures` submissions, then accepts.
    struct FlakySink {
        failures: Cell<u32>,
        calls: Cell<u32>,
    }

    impl ReportSink for FlakySink {
        fn submit(&self, _report: &IncidentReport) -> Result<IncidentId, SubmitError> {
            self.calls.set(self.calls.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(SubmitError::Transport("connection refused".to_string()));
            }
            Ok(IncidentId::new(format!("inc-{}", self.calls.get())))
        }
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            frame_interval: Duration::ZERO,
            failure_backoff: Duration::ZERO,
            ..MonitorSettings::default()
        }
    }

    fn pipeline(
        script: Vec<Vec<Detection>>,
        dir: &std::path::Path,
    ) -> AlertPipeline<ScriptedBackend, AcceptingSink> {
        AlertPipeline::new(
            CameraContext::new("cam-1", "Kitchen", "Building A"),
            AlertPolicy::default(),
            ScriptedBackend::from_frames(script),
            AcceptingSink,
            SnapshotWriter::new(dir),
        )
    }

    #[test]
    fn open_failure_never_reads_and_releases() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut source = MockSource::frames(3);
        source.fail_open = true;
        let mut pipeline = pipeline(Vec::new(), dir.path());
        let mut session = MonitorSession::new(settings());

        let err = session.run(&mut source, &mut pipeline).unwrap_err();
        assert!(matches!(err, SessionError::CaptureOpen { .. }));
        assert_eq!(source.reads, 0);
        assert_eq!(source.releases, 1);
        assert_eq!(pipeline.detector().calls(), 0);
    }

    #[test]
    fn end_of_stream_releases_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut source = MockSource::frames(4);
        let mut pipeline = pipeline(Vec::new(), dir.path());
        let mut session = MonitorSession::new(settings());

        let end = session.run(&mut source, &mut pipeline).expect("session");
        assert_eq!(end, SessionEnd::EndOfStream);
        assert_eq!(session.stats().frames_read, 4);
        assert_eq!(session.stats().frames_analysed, 4);
        assert_eq!(source.releases, 1);
    }

    #[test]
    fn stride_skips_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut source = MockSource::frames(7);
        let mut pipeline = pipeline(Vec::new(), dir.path());
        let mut session = MonitorSession::new(MonitorSettings {
            frame_stride: 3,
            ..settings()
        });

        session.run(&mut source, &mut pipeline).expect("session");
        assert_eq!(session.stats().frames_read, 7);
        assert_eq!(session.stats().frames_analysed, 3);
        assert_eq!(pipeline.detector().calls(), 3);
    }

    #[test]
    fn too_many_consecutive_failures_end_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut source = MockSource::new([Read::Frame, Read::Fail, Read::Fail, Read::Fail, Read::Frame]);
        let mut pipeline = pipeline(Vec::new(), dir.path());
        let mut session = MonitorSession::new(MonitorSettings {
            max_consecutive_failures: 2,
            ..settings()
        });

        let err = session.run(&mut source, &mut pipeline).unwrap_err();
        assert!(matches!(
            err,
            SessionError::ReadFailuresExhausted { failures: 3, .. }
        ));
        assert_eq!(source.reads, 4);
        assert_eq!(source.releases, 1);
    }

    #[test]
    fn successful_read_resets_failure_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut source = MockSource::new([
            Read::Fail,
            Read::Fail,
            Read::Frame,
            Read::Fail,
            Read::Fail,
            Read::Frame,
        ]);
        let mut pipeline = pipeline(Vec::new(), dir.path());
        let mut session = MonitorSession::new(MonitorSettings {
            max_consecutive_failures: 2,
            ..settings()
        });

        let end = session.run(&mut source, &mut pipeline).expect("session");
        assert_eq!(end, SessionEnd::EndOfStream);
        assert_eq!(session.stats().read_failures, 4);
        assert_eq!(session.stats().frames_read, 2);
    }

    #[test]
    fn alerts_are_counted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bbox = BoundingBox::new(2.0, 2.0, 10.0, 10.0).expect("bbox");
        let fire = Detection::new("fire", 0.95, bbox).expect("detection");
        let mut source = MockSource::frames(3);
        let mut pipeline = pipeline(vec![vec![fire.clone()], vec![fire.clone()], vec![]], dir.path());
        let mut session = MonitorSession::new(settings());

        session.run(&mut source, &mut pipeline).expect("session");
        let stats = session.stats();
        assert_eq!(stats.detections, 2);
        assert_eq!(stats.alerts_delivered, 1);
        assert_eq!(stats.alerts_suppressed, 1);
    }

    #[test]
    fn shutdown_flag_stops_before_reading() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut source = MockSource::frames(3);
        let mut pipeline = pipeline(Vec::new(), dir.path());
        let mut session = MonitorSession::new(settings());
        session.shutdown_flag().store(true, Ordering::SeqCst);

        let end = session.run(&mut source, &mut pipeline).expect("session");
        assert_eq!(end, SessionEnd::Interrupted);
        assert_eq!(source.reads, 0);
        assert_eq!(source.releases, 1);
    }

    #[test]
    fn late_retry_delivery_moves_alert_to_delivered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bbox = BoundingBox::new(2.0, 2.0, 10.0, 10.0).expect("bbox");
        let fire = Detection::new("fire", 0.95, bbox).expect("detection");
        let sink = FlakySink {
            failures: Cell::new(1),
            calls: Cell::new(0),
        };
        let mut source = MockSource::frames(2);
        let mut pipeline = AlertPipeline::new(
            CameraContext::new("cam-1", "Kitchen", "Building A"),
            AlertPolicy::default(),
            ScriptedBackend::from_frames(vec![vec![fire], vec![]]),
            &sink,
            SnapshotWriter::new(dir.path()),
        )
        .with_retry_queue(RetryQueue::new(4).with_backoff(Duration::ZERO, Duration::ZERO));
        let mut session = MonitorSession::new(settings());

        session.run(&mut source, &mut pipeline).expect("session");

        let stats = session.stats();
        assert_eq!(sink.calls.get(), 2);
        assert_eq!(stats.alerts_delivered, 1);
        assert_eq!(stats.alerts_redelivered, 1);
        assert_eq!(stats.alerts_undelivered, 0);
        assert_eq!(pipeline.pending_retries(), 0);
    }
}
