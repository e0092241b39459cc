use std::time::{Duration, Instant};

/// Wall-clock sampling window of a running calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalibrationWindow {
    stop_at: Instant,
}

impl CalibrationWindow {
    pub fn new(start: Instant, duration: Duration) -> Self {
        Self {
            stop_at: start + duration,
        }
    }

    /// Window of `seconds` seconds; negative or non-finite values give an
    /// already expired window.
    pub fn from_secs_f64(start: Instant, seconds: f64) -> Self {
        let duration = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);
        Self::new(start, duration)
    }

    pub fn stop_at(&self) -> Instant {
        self.stop_at
    }

    /// Time left at `now`, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.stop_at.saturating_duration_since(now)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.stop_at
    }
}
