use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Last accepted alert per camera. In-memory only.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_alert: HashMap<String, Instant>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `camera_id` has never alerted or its last alert is more
    /// than `cooldown` before `now`.
    pub fn should_alert(&self, camera_id: &str, now: Instant, cooldown: Duration) -> bool {
        match self.last_alert.get(camera_id) {
            None => true,
            Some(last) => now.saturating_duration_since(*last) > cooldown,
        }
    }

    pub fn record(&mut self, camera_id: &str, now: Instant) {
        self.last_alert.insert(camera_id.to_string(), now);
    }

    /// Check and record in one step. Returns whether the alert may proceed.
    pub fn try_acquire(&mut self, camera_id: &str, now: Instant, cooldown: Duration) -> bool {
        if !self.should_alert(camera_id, now, cooldown) {
            return false;
        }
        self.record(camera_id, now);
        true
    }

    pub fn last_alert(&self, camera_id: &str) -> Option<Instant> {
        self.last_alert.get(camera_id).copied()
    }
}

/// Cooldown state shared by several camera loops in one process.
#[derive(Clone, Debug, Default)]
pub struct SharedCooldownTracker {
    inner: Arc<Mutex<CooldownTracker>>,
}

impl SharedCooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, camera_id: &str, now: Instant, cooldown: Duration) -> bool {
        // A poisoned lock still holds valid timestamps.
        let mut tracker = match self.inner.lock() {
            Ok(tracker) => tracker,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracker.try_acquire(camera_id, now, cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(10);

    #[test]
    fn first_alert_is_allowed() {
        let tracker = CooldownTracker::new();
        assert!(tracker.should_alert("cam-1", Instant::now(), COOLDOWN));
    }

    #[test]
    fn boundary_is_strict() {
        let start = Instant::now();
        let mut tracker = CooldownTracker::new();
        assert!(tracker.try_acquire("cam-1", start, COOLDOWN));

        let eps = Duration::from_millis(1);
        assert!(!tracker.should_alert("cam-1", start + COOLDOWN - eps, COOLDOWN));
        assert!(!tracker.should_alert("cam-1", start + COOLDOWN, COOLDOWN));
        assert!(tracker.should_alert("cam-1", start + COOLDOWN + eps, COOLDOWN));
    }

    #[test]
    fn cameras_are_independent() {
        let now = Instant::now();
        let mut tracker = CooldownTracker::new();
        assert!(tracker.try_acquire("cam-1", now, COOLDOWN));
        assert!(!tracker.try_acquire("cam-1", now, COOLDOWN));
        assert!(tracker.try_acquire("cam-2", now, COOLDOWN));
        assert_eq!(tracker.last_alert("cam-2"), Some(now));
    }

    #[test]
    fn rejected_acquire_keeps_original_timestamp() {
        let start = Instant::now();
        let mut tracker = CooldownTracker::new();
        assert!(tracker.try_acquire("cam-1", start, COOLDOWN));
        assert!(!tracker.try_acquire("cam-1", start + Duration::from_secs(5), COOLDOWN));
        assert_eq!(tracker.last_alert("cam-1"), Some(start));
    }

    #[test]
    fn zero_cooldown_still_needs_time_to_pass() {
        let now = Instant::now();
        let mut tracker = CooldownTracker::new();
        assert!(tracker.try_acquire("cam-1", now, Duration::ZERO));
        assert!(!tracker.try_acquire("cam-1", now, Duration::ZERO));
        assert!(tracker.try_acquire("cam-1", now + Duration::from_millis(1), Duration::ZERO));
    }

    #[test]
    fn shared_tracker_grants_one_winner_across_threads() {
        let shared = SharedCooldownTracker::new();
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || shared.try_acquire("cam-1", now, COOLDOWN))
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 1);
    }
}
