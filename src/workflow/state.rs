//! Workflow Execution State
//!
//! One [`ExecutionState`] exists per tracked instance. It records which
//! steps have completed, whether the latest completion was synthesized by
//! the fallback watchdog, and where the instance is in its lifecycle.
//!
//! The state serializes to the snapshot format written to the persisted
//! store: steps, completed steps as an array, status and the timestamp of
//! the last applied completion.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::StepDescriptor;
use super::validator::{validate_steps, ValidationError};

/// Lifecycle status of a workflow instance.
///
/// ```text
/// idle -> running <-> paused
///         running -> completed
/// idle | running | paused -> error
/// ```
///
/// `completed` and `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Running,
    Paused,
    Completed,
    Error,
}

impl Status {
    /// Returns true if the transition `self -> next` is allowed.
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;

        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Idle, Error)
                | (Running, Error)
                | (Paused, Error)
        )
    }

    /// Returns true for `completed` and `error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Error)
    }

    /// Returns true for `running` and `paused`.
    pub fn is_active(self) -> bool {
        matches!(self, Status::Running | Status::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Running => "running",
            Status::Paused => "paused",
            Status::Completed => "completed",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: Status,
    pub to: Status,
}

/// Completed/total counts for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    /// Rounded to the nearest whole percent
    pub percentage: u8,
}

impl Progress {
    fn new(completed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u8
        };

        Self {
            completed,
            total,
            percentage,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({}%)", self.completed, self.total, self.percentage)
    }
}

/// Progress snapshot of one workflow instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExecutionState {
    /// Primary key for all lookups
    pub instance_id: String,

    /// Display name used in history entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    steps: Vec<StepDescriptor>,
    completed_steps: BTreeSet<u32>,
    #[serde(default)]
    synthesized_steps: BTreeSet<u32>,
    #[serde(default)]
    current_step: u32,
    status: Status,
    last_signal_at: DateTime<Utc>,
    #[serde(default)]
    is_synthesized: bool,
    started_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Creates an idle state with no completed steps.
    pub fn create(
        instance_id: impl Into<String>,
        steps: Vec<StepDescriptor>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        validate_steps(&steps)?;

        Ok(Self {
            instance_id: instance_id.into(),
            title: None,
            steps,
            completed_steps: BTreeSet::new(),
            synthesized_steps: BTreeSet::new(),
            current_step: 0,
            status: Status::Idle,
            last_signal_at: now,
            is_synthesized: false,
            started_at: now,
        })
    }

    /// Sets the display title.
    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    /// Moves to `next` if the transition table allows it.
    pub fn transition(&mut self, next: Status) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        debug!("{}: {} -> {}", self.instance_id, self.status, next);
        self.status = next;
        Ok(())
    }

    /// Records completion of step `sequence`.
    ///
    /// Returns true if the step was newly completed. A step that is already
    /// complete only refreshes `last_signal_at`. Unknown sequence numbers and
    /// instances that are not running are left untouched.
    pub fn apply_completion(
        &mut self,
        sequence: u32,
        synthesized: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status != Status::Running {
            debug!(
                "{}: ignoring step {} while {}",
                self.instance_id, sequence, self.status
            );
            return false;
        }

        if !self.contains_step(sequence) {
            debug!("{}: ignoring unknown step {}", self.instance_id, sequence);
            return false;
        }

        self.last_signal_at = now;

        if !self.completed_steps.insert(sequence) {
            return false;
        }

        self.is_synthesized = synthesized;
        if synthesized {
            self.synthesized_steps.insert(sequence);
        }
        self.current_step = self.current_step.max(sequence);

        if self.is_complete() {
            self.status = Status::Completed;
        }

        true
    }

    /// Returns the lowest-numbered step that has not completed.
    pub fn next_pending_step(&self) -> Option<&StepDescriptor> {
        self.steps
            .iter()
            .filter(|step| !self.completed_steps.contains(&step.step))
            .min_by_key(|step| step.step)
    }

    /// Restarts the fallback window, e.g. after a resume.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_signal_at = now;
    }

    /// Returns true if every step has completed.
    pub fn is_complete(&self) -> bool {
        self.completed_steps.len() == self.steps.len()
    }

    /// Returns true if `sequence` is one of this instance's steps.
    pub fn contains_step(&self, sequence: u32) -> bool {
        self.steps.iter().any(|step| step.step == sequence)
    }

    /// Checks the invariants a persisted snapshot must satisfy before it is
    /// rehydrated.
    pub fn is_consistent(&self) -> bool {
        validate_steps(&self.steps).is_ok()
            && self.completed_steps.iter().all(|n| self.contains_step(*n))
            && self.synthesized_steps.is_subset(&self.completed_steps)
            && (self.status == Status::Completed) == self.is_complete()
    }

    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    pub fn completed_steps(&self) -> &BTreeSet<u32> {
        &self.completed_steps
    }

    /// Steps completed by the fallback watchdog.
    pub fn synthesized_steps(&self) -> &BTreeSet<u32> {
        &self.synthesized_steps
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn last_signal_at(&self) -> DateTime<Utc> {
        self.last_signal_at
    }

    /// True if the most recent completion came from the fallback path.
    pub fn is_synthesized(&self) -> bool {
        self.is_synthesized
    }

    /// Highest sequence number completed so far.
    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn progress(&self) -> Progress {
        Progress::new(self.completed_steps.len(), self.steps.len())
    }
}
