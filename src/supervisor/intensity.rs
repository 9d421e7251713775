//! Restart-intensity throttling.
//!
//! A sliding window of restart timestamps. Entries older than the window
//! are pruned on every touch; once the count inside the window exceeds
//! the configured maximum the supervisor terminates itself rather than
//! keep restarting a hopeless child.

// Layer 1: Standard library imports
use std::collections::VecDeque;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Duration as ChronoDuration, Utc};

// Layer 3: Internal module imports
use super::types::RestartIntensity;

/// Sliding restart log for one supervisor.
#[derive(Debug, Clone)]
pub(crate) struct RestartLog {
    intensity: RestartIntensity,
    history: VecDeque<DateTime<Utc>>,
}

impl RestartLog {
    pub(crate) fn new(intensity: RestartIntensity) -> Self {
        Self {
            intensity,
            history: VecDeque::new(),
        }
    }

    pub(crate) fn intensity(&self) -> RestartIntensity {
        self.intensity
    }

    /// Record a restart happening now.
    pub(crate) fn record(&mut self) {
        self.history.push_back(Utc::now());
        self.prune();
    }

    /// Whether the window now holds more restarts than allowed.
    ///
    /// Reaching `max_restarts + 1` inside the window is the breach.
    pub(crate) fn is_exceeded(&mut self) -> bool {
        self.prune();
        self.history.len() > self.intensity.max_restarts as usize
    }

    /// Restarts currently inside the window.
    pub(crate) fn len(&mut self) -> usize {
        self.prune();
        self.history.len()
    }

    fn prune(&mut self) {
        let window = ChronoDuration::from_std(self.intensity.within)
            .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 1_000));
        let cutoff = Utc::now() - window;
        while self
            .history
            .front()
            .is_some_and(|timestamp| *timestamp < cutoff)
        {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_log_is_not_exceeded() {
        let mut log = RestartLog::new(RestartIntensity::new(3, Duration::from_secs(5)));
        assert!(!log.is_exceeded());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn test_exceeded_at_max_plus_one() {
        let mut log = RestartLog::new(RestartIntensity::new(2, Duration::from_secs(60)));

        log.record();
        assert!(!log.is_exceeded());
        log.record();
        assert!(!log.is_exceeded());

        // Third restart inside the window breaches max_restarts = 2.
        log.record();
        assert!(log.is_exceeded());
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_old_entries_expire() {
        let mut log = RestartLog::new(RestartIntensity::new(1, Duration::from_millis(40)));

        log.record();
        log.record();
        assert!(log.is_exceeded());

        std::thread::sleep(Duration::from_millis(60));
        assert!(!log.is_exceeded());
        assert_eq!(log.len(), 0);

        log.record();
        assert!(!log.is_exceeded());
    }

    #[test]
    fn test_zero_max_restarts_breaches_immediately() {
        let mut log = RestartLog::new(RestartIntensity::new(0, Duration::from_secs(5)));
        log.record();
        assert!(log.is_exceeded());
    }
}
