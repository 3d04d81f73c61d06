//! Execution Timeline
//!
//! Records lifecycle events of one workflow instance for run summaries and
//! the CLI's progress chart.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventType {
    /// Instance started
    Started,
    /// A step completion was applied
    StepApplied { step: u32, synthesized: bool },
    /// Ticks suspended
    Paused,
    /// Ticks resumed
    Resumed,
    /// Every step completed
    Completed,
    /// Instance ended in error
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Type of event
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}

/// Tracks the execution timeline of a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: DateTime<Utc>,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting at `start_time`.
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            events: Vec::new(),
            start_time,
        }
    }

    /// Records an event.
    pub fn add_event(&mut self, event_type: EventType, timestamp: DateTime<Utc>) {
        self.events.push(TimelineEvent {
            event_type,
            timestamp,
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Milliseconds between the start and `now`.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.start_time)
            .num_milliseconds()
            .max(0)
    }

    /// Total milliseconds spent paused up to `now`.
    pub fn paused_ms(&self, now: DateTime<Utc>) -> i64 {
        let mut total = 0;
        let mut paused_at: Option<DateTime<Utc>> = None;

        for event in &self.events {
            match event.event_type {
                EventType::Paused => paused_at = Some(event.timestamp),
                EventType::Resumed | EventType::Completed | EventType::Failed => {
                    if let Some(start) = paused_at.take() {
                        total += event.timestamp.signed_duration_since(start).num_milliseconds();
                    }
                }
                _ => {}
            }
        }

        if let Some(start) = paused_at {
            total += now.signed_duration_since(start).num_milliseconds();
        }

        total.max(0)
    }

    /// Milliseconds since start at which each step was applied.
    pub fn step_offsets(&self) -> BTreeMap<u32, i64> {
        self.events
            .iter()
            .filter_map(|event| match event.event_type {
                EventType::StepApplied { step, .. } => Some((
                    step,
                    event
                        .timestamp
                        .signed_duration_since(self.start_time)
                        .num_milliseconds(),
                )),
                _ => None,
            })
            .collect()
    }

    /// Generates an ASCII chart of step completions.
    ///
    /// Each step's bar spans from the previous completion to its own,
    /// scaled to the total run time. Synthesized steps are drawn with `~`.
    pub fn progress_chart(&self, now: DateTime<Utc>) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed_ms(now);
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;
        let mut previous = 0i64;

        for event in &self.events {
            let EventType::StepApplied { step, synthesized } = event.event_type else {
                continue;
            };

            let end = event
                .timestamp
                .signed_duration_since(self.start_time)
                .num_milliseconds()
                .max(previous);
            let start_pos = (previous as f64 * scale) as usize;
            let width = ((end - previous) as f64 * scale).max(1.0) as usize;
            let mark = if synthesized { "~" } else { "#" };

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&mark.repeat(width));

            output.push_str(&format!(
                "{:>8} |{:<51}| ({} ms)\n",
                format!("step {}", step),
                bar,
                end - previous
            ));
            previous = end;
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}
