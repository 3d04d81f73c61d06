//! Snapshots and Run History
//!
//! In-flight instances are kept as a JSON object under [`SNAPSHOTS_KEY`]
//! (`instance_id -> ExecutionState`). Finished runs are appended to the
//! list under [`HISTORY_KEY`] together with a summary.

use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{SnapshotStore, StoreError, HISTORY_KEY, SNAPSHOTS_KEY};
use crate::monitoring::ExecutionTimeline;
use crate::workflow::{ExecutionState, Status};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Completed,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => f.write_str("Completed"),
            Outcome::Failed => f.write_str("Failed"),
        }
    }
}

/// Counts and timing of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub synthesized_steps: usize,
    pub elapsed_ms: i64,
    pub paused_ms: i64,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl RunSummary {
    /// Builds a summary from the final state and timeline.
    pub fn from_run(
        state: &ExecutionState,
        timeline: &ExecutionTimeline,
        finished_at: DateTime<Utc>,
        cause: Option<String>,
    ) -> Self {
        let outcome = if state.status() == Status::Completed {
            Outcome::Completed
        } else {
            Outcome::Failed
        };

        Self {
            total_steps: state.steps().len(),
            completed_steps: state.completed_steps().len(),
            synthesized_steps: state.synthesized_steps().len(),
            elapsed_ms: timeline.elapsed_ms(finished_at),
            paused_ms: timeline.paused_ms(finished_at),
            outcome,
            cause,
        }
    }

    /// Human-readable one-line description.
    pub fn describe(&self) -> String {
        let seconds = self.elapsed_ms as f64 / 1000.0;
        let mut text = match self.outcome {
            Outcome::Completed => format!(
                "Workflow completed with {} steps in {:.1}s",
                self.total_steps, seconds
            ),
            Outcome::Failed => format!(
                "Workflow failed after {}/{} steps in {:.1}s",
                self.completed_steps, self.total_steps, seconds
            ),
        };

        if self.synthesized_steps > 0 {
            text.push_str(&format!(" ({} synthesized)", self.synthesized_steps));
        }
        if let Some(cause) = &self.cause {
            text.push_str(&format!(": {}", cause));
        }
        text
    }
}

/// One entry of the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedRun {
    pub id: String,
    pub name: String,
    pub description: String,
    pub finished_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub state: ExecutionState,
    pub timeline: ExecutionTimeline,
}

impl ArchivedRun {
    pub fn new(
        state: ExecutionState,
        timeline: ExecutionTimeline,
        finished_at: DateTime<Utc>,
        cause: Option<String>,
    ) -> Self {
        let summary = RunSummary::from_run(&state, &timeline, finished_at, cause);

        Self {
            id: state.instance_id.clone(),
            name: state
                .title
                .clone()
                .unwrap_or_else(|| "Workflow Execution".to_string()),
            description: summary.describe(),
            finished_at,
            summary,
            state,
            timeline,
        }
    }
}

fn load_snapshot_map(store: &dyn SnapshotStore) -> Result<Map<String, Value>, StoreError> {
    match store.get(SNAPSHOTS_KEY)? {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => {
            warn!("Snapshot collection is not an object; starting empty");
            Ok(Map::new())
        }
        None => Ok(Map::new()),
    }
}

/// Writes the state of one instance into the snapshot collection.
pub fn save_snapshot(store: &dyn SnapshotStore, state: &ExecutionState) -> Result<(), StoreError> {
    let mut map = load_snapshot_map(store)?;
    map.insert(state.instance_id.clone(), serde_json::to_value(state)?);
    store.set(SNAPSHOTS_KEY, Value::Object(map))?;

    debug!("Saved snapshot for {} ({})", state.instance_id, state.status());
    Ok(())
}

/// Drops one instance from the snapshot collection.
pub fn remove_snapshot(store: &dyn SnapshotStore, instance_id: &str) -> Result<(), StoreError> {
    let mut map = load_snapshot_map(store)?;
    if map.remove(instance_id).is_some() {
        store.set(SNAPSHOTS_KEY, Value::Object(map))?;
        debug!("Removed snapshot for {}", instance_id);
    }
    Ok(())
}

/// Reads every snapshot that parses. Unreadable entries are skipped.
pub fn load_snapshots(store: &dyn SnapshotStore) -> Result<Vec<ExecutionState>, StoreError> {
    let map = load_snapshot_map(store)?;
    let mut states = Vec::with_capacity(map.len());

    for (instance_id, value) in map {
        match serde_json::from_value::<ExecutionState>(value) {
            Ok(state) => states.push(state),
            Err(e) => warn!("Skipping unreadable snapshot for {}: {}", instance_id, e),
        }
    }

    Ok(states)
}

/// Appends a finished run to the history.
pub fn archive_run(store: &dyn SnapshotStore, run: &ArchivedRun) -> Result<(), StoreError> {
    store.append_to_list(HISTORY_KEY, serde_json::to_value(run)?)?;
    debug!("Archived run {}: {}", run.id, run.description);
    Ok(())
}

/// Reads the run history, oldest first.
pub fn load_history(store: &dyn SnapshotStore) -> Result<Vec<ArchivedRun>, StoreError> {
    match store.get(HISTORY_KEY)? {
        None => Ok(Vec::new()),
        Some(value @ Value::Array(_)) => Ok(serde_json::from_value(value)?),
        Some(_) => Err(StoreError::NotAList(HISTORY_KEY.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::EventType;
    use crate::storage::MemoryStore;
    use crate::workflow::StepDescriptor;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn running(id: &str, n: u32) -> ExecutionState {
        let steps = (1..=n)
            .map(|i| StepDescriptor::new(i, "act", format!("Step {}", i)))
            .collect();
        let mut state = ExecutionState::create(id, steps, t0()).unwrap();
        state.transition(Status::Running).unwrap();
        state
    }

    #[test]
    fn test_snapshot_save_load_remove() {
        let store = MemoryStore::new();
        let mut state = running("wf-1", 3);
        state.apply_completion(1, false, t0());

        save_snapshot(&store, &state).unwrap();
        save_snapshot(&store, &running("wf-2", 2)).unwrap();

        let mut loaded = load_snapshots(&store).unwrap();
        loaded.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], state);

        remove_snapshot(&store, "wf-1").unwrap();
        let remaining = load_snapshots(&store).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].instance_id, "wf-2");
    }

    #[test]
    fn test_unreadable_snapshot_skipped() {
        let store = MemoryStore::new();
        store
            .set(SNAPSHOTS_KEY, json!({"bad": {"status": "running"}}))
            .unwrap();
        save_snapshot(&store, &running("wf-ok", 1)).unwrap();

        let loaded = load_snapshots(&store).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].instance_id, "wf-ok");
    }

    #[test]
    fn test_summary_for_completed_run() {
        let mut state = running("wf-1", 2).with_title(Some("Audit".to_string()));
        state.apply_completion(1, true, t0());
        state.apply_completion(2, false, t0());

        let mut timeline = ExecutionTimeline::new(t0());
        timeline.add_event(EventType::Completed, t0() + Duration::seconds(12));

        let run = ArchivedRun::new(state, timeline, t0() + Duration::seconds(12), None);
        assert_eq!(run.name, "Audit");
        assert_eq!(run.summary.outcome, Outcome::Completed);
        assert_eq!(run.summary.elapsed_ms, 12_000);
        assert_eq!(
            run.description,
            "Workflow completed with 2 steps in 12.0s (1 synthesized)"
        );
    }

    #[test]
    fn test_summary_for_failed_run() {
        let mut state = running("wf-1", 4);
        state.apply_completion(1, false, t0());
        state.transition(Status::Error).unwrap();

        let timeline = ExecutionTimeline::new(t0());
        let run = ArchivedRun::new(
            state,
            timeline,
            t0() + Duration::milliseconds(2500),
            Some("HTTP error! status: 502".to_string()),
        );

        assert_eq!(run.name, "Workflow Execution");
        assert_eq!(run.summary.outcome, Outcome::Failed);
        assert_eq!(
            run.description,
            "Workflow failed after 1/4 steps in 2.5s: HTTP error! status: 502"
        );
    }

    #[test]
    fn test_history_append_only() {
        let store = MemoryStore::new();

        for id in ["wf-1", "wf-2"] {
            let mut state = running(id, 1);
            state.apply_completion(1, false, t0());
            let run = ArchivedRun::new(state, ExecutionTimeline::new(t0()), t0(), None);
            archive_run(&store, &run).unwrap();
        }

        let history = load_history(&store).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "wf-1");
        assert_eq!(history[1].id, "wf-2");
    }

    #[test]
    fn test_empty_history() {
        let store = MemoryStore::new();
        assert!(load_history(&store).unwrap().is_empty());
    }
}
