//! File-based pause/resume signaling.
//!
//! While the flag file exists the instance is paused; removing it resumes
//! the instance. Only changes of the flag act on the tracker, so a pause
//! requested through the API is not undone by an absent file.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::error::TrackerError;
use super::tracker::WorkflowTracker;

/// Interval for checking the pause flag file.
pub const PAUSE_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Polls `path` and pauses or resumes `instance_id` as the file appears and
/// disappears. The task ends when the instance leaves the tracker.
pub fn watch_pause_flag(
    tracker: WorkflowTracker,
    instance_id: impl Into<String>,
    path: impl Into<PathBuf>,
) -> JoinHandle<()> {
    let instance_id = instance_id.into();
    let path = path.into();

    tokio::spawn(async move {
        let mut ticker = interval(PAUSE_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flagged = false;

        info!(
            "Watching {} for pause requests on {}",
            path.display(),
            instance_id
        );

        loop {
            ticker.tick().await;

            if tracker.get(&instance_id).is_none() {
                debug!("Pause watcher for {} stopped", instance_id);
                break;
            }

            let present = path.exists();
            if present == flagged {
                continue;
            }
            flagged = present;

            match apply_flag(&tracker, &instance_id, present) {
                Ok(()) => {}
                Err(TrackerError::UnknownInstance(_)) => break,
                Err(e) => warn!("Pause flag for {} not applied: {}", instance_id, e),
            }
        }
    })
}

fn apply_flag(tracker: &WorkflowTracker, instance_id: &str, present: bool) -> Result<(), TrackerError> {
    if present {
        if tracker.pause(instance_id)? {
            info!("Execution paused - waiting for resume signal");
        }
    } else if tracker.resume(instance_id)? {
        info!("Resume signal received - continuing execution");
    }
    Ok(())
}
