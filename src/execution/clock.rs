//! Tracker clock.
//!
//! Wall-clock timestamps derived from tokio's monotonic clock, so a paused
//! test runtime drives state timestamps as well as timers.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_wall: DateTime<Utc>,
    anchor: Instant,
}

impl Clock {
    /// Anchors the clock at the current time.
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = ChronoDuration::from_std(self.anchor.elapsed())
            .unwrap_or_else(|_| ChronoDuration::zero());
        self.anchor_wall + elapsed
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
