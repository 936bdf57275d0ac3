use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::report::{IncidentId, IncidentReport};
use super::sink::ReportSink;

pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

struct PendingReport {
    report: IncidentReport,
    attempts: u32,
    next_attempt: Instant,
}

/// Outcome of one `retry_due` pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryPass {
    pub delivered: Vec<IncidentId>,
    pub rescheduled: usize,
    pub abandoned: usize,
}

impl RetryPass {
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.rescheduled == 0 && self.abandoned == 0
    }
}

/// Bounded queue of undelivered reports with exponential back-off.
///
/// A capacity of zero disables the queue: `push` refuses everything.
/// When full, the oldest pending report is evicted.
pub struct RetryQueue {
    capacity: usize,
    base_backoff: Duration,
    max_backoff: Duration,
    max_attempts: u32,
    pending: VecDeque<PendingReport>,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pending: VecDeque::with_capacity(capacity),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max.max(base);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue a report whose first delivery failed at `now`.
    pub fn push(&mut self, report: IncidentReport, now: Instant) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if self.pending.len() >= self.capacity {
            if let Some(evicted) = self.pending.pop_front() {
                log::warn!(
                    "retry queue full; dropping {} report for camera {} ({})",
                    evicted.report.detection_type,
                    evicted.report.camera_id,
                    evicted.report.timestamp
                );
            }
        }
        self.pending.push_back(PendingReport {
            report,
            attempts: 1,
            next_attempt: now + self.backoff_for(1),
        });
        true
    }

    /// Attempt every report whose back-off has elapsed.
    pub fn retry_due<S: ReportSink + ?Sized>(&mut self, sink: &S, now: Instant) -> RetryPass {
        let mut pass = RetryPass::default();
        let mut remaining = VecDeque::with_capacity(self.pending.len());

        while let Some(mut entry) = self.pending.pop_front() {
            if entry.next_attempt > now {
                remaining.push_back(entry);
                continue;
            }
            match sink.submit(&entry.report) {
                Ok(id) => {
                    log::info!(
                        "incident {} created for camera {} after {} retries",
                        id,
                        entry.report.camera_id,
                        entry.attempts
                    );
                    pass.delivered.push(id);
                }
                Err(err) => {
                    entry.attempts += 1;
                    if entry.attempts >= self.max_attempts {
                        log::warn!(
                            "giving up on {} report for camera {} after {} attempts: {}",
                            entry.report.detection_type,
                            entry.report.camera_id,
                            entry.attempts,
                            err
                        );
                        pass.abandoned += 1;
                    } else {
                        entry.next_attempt = now + self.backoff_for(entry.attempts);
                        pass.rescheduled += 1;
                        remaining.push_back(entry);
                    }
                }
            }
        }

        self.pending = remaining;
        pass
    }

    fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::policy::Severity;
    use crate::alert::sink::SubmitError;
    use std::cell::RefCell;

    struct FlakySink {
        failures_left: RefCell<u32>,
        calls: RefCell<u32>,
    }

    impl FlakySink {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: RefCell::new(times),
                calls: RefCell::new(0),
            }
        }
    }

    impl ReportSink for FlakySink {
        fn submit(&self, _report: &IncidentReport) -> Result<IncidentId, SubmitError> {
            *self.calls.borrow_mut() += 1;
            let mut left = self.failures_left.borrow_mut();
            if *left > 0 {
                *left -= 1;
                return Err(SubmitError::Transport("connection refused".to_string()));
            }
            Ok(IncidentId::new("inc-1"))
        }
    }

    fn report(camera_id: &str) -> IncidentReport {
        IncidentReport {
            camera_id: camera_id.to_string(),
            camera_name: "Kitchen".to_string(),
            location: "Building A".to_string(),
            detection_type: "fire".to_string(),
            confidence: 0.85,
            timestamp: "2024-03-01T12:00:00.000+00:00".to_string(),
            image: String::new(),
            snapshot_path: String::new(),
            bbox: [0.0; 4],
            severity: Severity::Medium,
        }
    }

    #[test]
    fn disabled_queue_refuses_reports() {
        let mut queue = RetryQueue::disabled();
        assert!(!queue.push(report("cam-1"), Instant::now()));
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let now = Instant::now();
        let mut queue = RetryQueue::new(2);
        assert!(queue.push(report("cam-1"), now));
        assert!(queue.push(report("cam-2"), now));
        assert!(queue.push(report("cam-3"), now));
        assert_eq!(queue.len(), 2);
        let cameras: Vec<_> = queue
            .pending
            .iter()
            .map(|p| p.report.camera_id.as_str())
            .collect();
        assert_eq!(cameras, vec!["cam-2", "cam-3"]);
    }

    #[test]
    fn waits_for_backoff_before_retrying() {
        let now = Instant::now();
        let sink = FlakySink::failing(0);
        let mut queue = RetryQueue::new(4).with_backoff(Duration::from_secs(2), Duration::from_secs(60));
        queue.push(report("cam-1"), now);

        let early = queue.retry_due(&sink, now + Duration::from_secs(1));
        assert_eq!(early, RetryPass::default());
        assert_eq!(*sink.calls.borrow(), 0);

        let due = queue.retry_due(&sink, now + Duration::from_secs(2));
        assert_eq!(due.delivered, vec![IncidentId::new("inc-1")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let queue = RetryQueue::new(1).with_backoff(Duration::from_secs(2), Duration::from_secs(5));
        assert_eq!(queue.backoff_for(1), Duration::from_secs(2));
        assert_eq!(queue.backoff_for(2), Duration::from_secs(4));
        assert_eq!(queue.backoff_for(3), Duration::from_secs(5));
    }

    #[test]
    fn abandons_after_max_attempts() {
        let now = Instant::now();
        let sink = FlakySink::failing(u32::MAX);
        let mut queue = RetryQueue::new(4)
            .with_backoff(Duration::ZERO, Duration::ZERO)
            .with_max_attempts(3);
        queue.push(report("cam-1"), now);

        let first = queue.retry_due(&sink, now);
        assert_eq!(first.rescheduled, 1);
        let second = queue.retry_due(&sink, now);
        assert_eq!(second.abandoned, 1);
        assert!(queue.is_empty());
        assert_eq!(*sink.calls.borrow(), 2);
    }
}
