//! Fallback Monitor
//!
//! Watchdog that keeps a running instance visibly moving when the external
//! signal source goes quiet: once no completion has been applied for longer
//! than the timeout, the next pending step is completed synthetically.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;

use crate::workflow::{ExecutionState, Status};

/// Default time without an applied completion before synthesis kicks in.
pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Stall detector for a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackMonitor {
    timeout: Duration,
}

impl FallbackMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True iff the instance is running, has been silent for longer than the
    /// timeout, and still has a pending step.
    pub fn should_synthesize(&self, state: &ExecutionState, now: DateTime<Utc>) -> bool {
        if state.status() != Status::Running {
            return false;
        }

        let silent_ms = now
            .signed_duration_since(state.last_signal_at())
            .num_milliseconds();

        silent_ms > self.timeout.as_millis() as i64 && state.next_pending_step().is_some()
    }

    /// Synthesizes the next pending step if the check passes.
    ///
    /// Returns the sequence number that was completed.
    pub fn check(&self, state: &mut ExecutionState, now: DateTime<Utc>) -> Option<u32> {
        if !self.should_synthesize(state, now) {
            return None;
        }

        let sequence = state.next_pending_step()?.step;
        if state.apply_completion(sequence, true, now) {
            info!(
                "Fallback: auto-completing step {} for workflow {}",
                sequence, state.instance_id
            );
            Some(sequence)
        } else {
            None
        }
    }
}

impl Default for FallbackMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_TIMEOUT)
    }
}
