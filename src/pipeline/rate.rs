//! Inter-frame interval tracking.

use std::time::{Duration, Instant};

/// Measures the interval between consecutive frames.
///
/// The rate is the reciprocal of the most recent interval, so it reacts
/// immediately to changes in pacing.
#[derive(Debug, Clone, Default)]
pub struct RateMeter {
    last: Option<Instant>,
    interval: Option<Duration>,
    count: u64,
}

impl RateMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame observed at `now`
    pub fn record(&mut self, now: Instant) {
        if let Some(last) = self.last {
            self.interval = Some(now.saturating_duration_since(last));
        }
        self.last = Some(now);
        self.count += 1;
    }

    /// Interval between the two most recent frames
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Time of the most recent frame
    pub fn last_frame_at(&self) -> Option<Instant> {
        self.last
    }

    /// Frames recorded so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// `1 / interval`, or 0 until two frames have been seen
    pub fn fps(&self) -> f64 {
        match self.interval {
            Some(d) if !d.is_zero() => 1.0 / d.as_secs_f64(),
            _ => 0.0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
