//! Workflow Tracker
//!
//! The orchestrator that owns every active instance and wires together:
//! - Signal subscription feeding each instance's [`StepSignalQueue`]
//! - A drain tick applying at most `catch_up_per_tick` queued signals
//! - A fallback tick synthesizing progress when signals stop arriving
//! - Pause/resume with persisted snapshots for recovery after a restart
//! - Archival and teardown once an instance reaches a terminal state

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::monitoring::{EventType, ExecutionTimeline};
use crate::signal::{SignalHandler, SignalSource, StepSignal, Subscription, UnavailableSource};
use crate::storage::archive::{self, ArchivedRun, Outcome, RunSummary};
use crate::storage::SnapshotStore;
use crate::workflow::{ExecutionState, Progress, Status, StepDescriptor};

use super::clock::Clock;
use super::error::TrackerError;
use super::fallback::{FallbackMonitor, DEFAULT_FALLBACK_TIMEOUT};
use super::queue::StepSignalQueue;
use super::trigger::{NoopTrigger, WorkflowTrigger};

/// Default cadence of the drain and fallback ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of queued signals one drain tick may apply.
pub const DEFAULT_CATCH_UP_PER_TICK: usize = 1;

/// Buffered events per receiver before slow receivers start lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Timing configuration for a [`WorkflowTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    tick_interval: Duration,
    fallback_timeout: Duration,
    catch_up_per_tick: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            fallback_timeout: DEFAULT_FALLBACK_TIMEOUT,
            catch_up_per_tick: DEFAULT_CATCH_UP_PER_TICK,
        }
    }
}

impl TrackerConfig {
    /// Sets the tick cadence (at least 1 ms).
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Sets how long an instance may go without a completion before the
    /// fallback synthesizes one.
    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    /// Sets how many queued signals one drain tick may apply (at least 1).
    pub fn with_catch_up_per_tick(mut self, count: usize) -> Self {
        self.catch_up_per_tick = count.max(1);
        self
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn fallback_timeout(&self) -> Duration {
        self.fallback_timeout
    }

    pub fn catch_up_per_tick(&self) -> usize {
        self.catch_up_per_tick
    }
}

/// Status notifications published to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Started {
        instance_id: String,
        total_steps: usize,
    },
    /// No real signals will arrive; progress is synthesized.
    Degraded {
        instance_id: String,
        reason: String,
    },
    StepApplied {
        instance_id: String,
        step: u32,
        synthesized: bool,
        progress: Progress,
    },
    Paused {
        instance_id: String,
    },
    Resumed {
        instance_id: String,
    },
    Completed {
        instance_id: String,
        summary: RunSummary,
    },
    Failed {
        instance_id: String,
        cause: String,
    },
    Cancelled {
        instance_id: String,
    },
}

impl TrackerEvent {
    pub fn instance_id(&self) -> &str {
        match self {
            TrackerEvent::Started { instance_id, .. }
            | TrackerEvent::Degraded { instance_id, .. }
            | TrackerEvent::StepApplied { instance_id, .. }
            | TrackerEvent::Paused { instance_id }
            | TrackerEvent::Resumed { instance_id }
            | TrackerEvent::Completed { instance_id, .. }
            | TrackerEvent::Failed { instance_id, .. }
            | TrackerEvent::Cancelled { instance_id } => instance_id,
        }
    }

    /// True for events after which the instance is gone from the tracker.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TrackerEvent::Completed { .. }
                | TrackerEvent::Failed { .. }
                | TrackerEvent::Cancelled { .. }
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum TickKind {
    Drain,
    Fallback,
}

struct TickHandles {
    drain: JoinHandle<()>,
    fallback: JoinHandle<()>,
}

impl TickHandles {
    fn abort(self) {
        self.drain.abort();
        self.fallback.abort();
    }
}

/// Registry entry for one instance.
struct TrackedInstance {
    state: ExecutionState,
    queue: StepSignalQueue,
    timeline: ExecutionTimeline,
    subscription: Option<Subscription>,
    ticks: Option<TickHandles>,
}

impl TrackedInstance {
    fn new(state: ExecutionState, timeline: ExecutionTimeline) -> Self {
        Self {
            state,
            queue: StepSignalQueue::new(),
            timeline,
            subscription: None,
            ticks: None,
        }
    }

    /// Cancels both ticks and the signal subscription.
    fn release(&mut self) {
        if let Some(ticks) = self.ticks.take() {
            ticks.abort();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// State shared between the tracker handle and its tick tasks.
struct Shared {
    config: TrackerConfig,
    monitor: FallbackMonitor,
    clock: Clock,
    store: Arc<dyn SnapshotStore>,
    events: broadcast::Sender<TrackerEvent>,
    registry: Mutex<HashMap<String, TrackedInstance>>,
    /// Held across every read-modify-write of the snapshot collection and
    /// the history list. Taken after `registry` when both are needed.
    store_lock: Mutex<()>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, HashMap<String, TrackedInstance>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TrackerEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn store_guard(&self) -> MutexGuard<'_, ()> {
        self.store_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &ExecutionState) {
        let _guard = self.store_guard();
        if let Err(e) = archive::save_snapshot(self.store.as_ref(), state) {
            warn!("Failed to save snapshot for {}: {}", state.instance_id, e);
        }
    }

    fn forget_snapshot(&self, instance_id: &str) {
        let _guard = self.store_guard();
        if let Err(e) = archive::remove_snapshot(self.store.as_ref(), instance_id) {
            warn!("Failed to remove snapshot for {}: {}", instance_id, e);
        }
    }

    fn archive(&self, run: &ArchivedRun) {
        let _guard = self.store_guard();
        if let Err(e) = archive::archive_run(self.store.as_ref(), run) {
            error!("Failed to archive workflow {}: {}", run.id, e);
        }
    }

    /// Buffers a real signal. Unknown instances and out-of-range steps are
    /// dropped.
    fn enqueue_signal(&self, instance_id: &str, signal: StepSignal) {
        let mut registry = self.registry();
        let Some(instance) = registry.get_mut(instance_id) else {
            debug!("Dropping step {} for inactive workflow {}", signal.step, instance_id);
            return;
        };

        if !instance.state.contains_step(signal.step) {
            debug!(
                "Dropping out-of-range step {} for workflow {}",
                signal.step, instance_id
            );
            return;
        }

        instance.queue.enqueue(signal.step);
        debug!(
            "Received step update {} for {} ({} queued)",
            signal.step,
            instance_id,
            instance.queue.len()
        );
    }

    /// Applies queued signals. Returns false once the instance is gone.
    fn drain_tick(&self, instance_id: &str, now: DateTime<Utc>) -> bool {
        let mut applied = Vec::new();

        let finished = {
            let mut registry = self.registry();
            let Some(instance) = registry.get_mut(instance_id) else {
                return false;
            };

            // Suspended while paused: signals stay buffered.
            if instance.state.status() != Status::Running {
                return true;
            }

            for _ in 0..self.config.catch_up_per_tick {
                let Some(step) = instance.queue.dequeue_one() else {
                    break;
                };

                if instance.state.apply_completion(step, false, now) {
                    instance.timeline.add_event(
                        EventType::StepApplied {
                            step,
                            synthesized: false,
                        },
                        now,
                    );
                    applied.push((step, instance.state.progress()));
                } else {
                    debug!("{}: step {} already complete", instance_id, step);
                }

                if instance.state.status() == Status::Completed {
                    break;
                }
            }

            if instance.state.status() == Status::Completed {
                registry.remove(instance_id)
            } else {
                None
            }
        };

        for (step, progress) in applied {
            info!("Workflow {} step {} completed: {}", instance_id, step, progress);
            self.emit(TrackerEvent::StepApplied {
                instance_id: instance_id.to_string(),
                step,
                synthesized: false,
                progress,
            });
        }

        match finished {
            Some(instance) => {
                self.finish(instance, now, None);
                false
            }
            None => true,
        }
    }

    /// Runs the stall check. Returns false once the instance is gone.
    fn fallback_tick(&self, instance_id: &str, now: DateTime<Utc>) -> bool {
        let (applied, finished) = {
            let mut registry = self.registry();
            let Some(instance) = registry.get_mut(instance_id) else {
                return false;
            };

            let applied = self
                .monitor
                .check(&mut instance.state, now)
                .map(|step| {
                    instance.timeline.add_event(
                        EventType::StepApplied {
                            step,
                            synthesized: true,
                        },
                        now,
                    );
                    (step, instance.state.progress())
                });

            let finished = if instance.state.status() == Status::Completed {
                registry.remove(instance_id)
            } else {
                None
            };

            (applied, finished)
        };

        if let Some((step, progress)) = applied {
            self.emit(TrackerEvent::StepApplied {
                instance_id: instance_id.to_string(),
                step,
                synthesized: true,
                progress,
            });
        }

        match finished {
            Some(instance) => {
                self.finish(instance, now, None);
                false
            }
            None => true,
        }
    }

    /// Tears down a terminal instance that has already left the registry,
    /// archives it and reports the outcome.
    fn finish(&self, mut instance: TrackedInstance, now: DateTime<Utc>, cause: Option<String>) {
        instance.release();

        let instance_id = instance.state.instance_id.clone();
        let event_type = if instance.state.status() == Status::Completed {
            EventType::Completed
        } else {
            EventType::Failed
        };
        instance.timeline.add_event(event_type, now);

        let run = ArchivedRun::new(instance.state, instance.timeline, now, cause.clone());
        self.archive(&run);
        self.forget_snapshot(&instance_id);

        match run.summary.outcome {
            Outcome::Completed => {
                info!("Workflow {} finished: {}", instance_id, run.description);
                self.emit(TrackerEvent::Completed {
                    instance_id,
                    summary: run.summary,
                });
            }
            Outcome::Failed => {
                error!("Workflow {} failed: {}", instance_id, run.description);
                self.emit(TrackerEvent::Failed {
                    instance_id,
                    cause: cause.unwrap_or_else(|| "unknown error".to_string()),
                });
            }
        }
    }
}

/// Tracks progress of concurrently running workflow instances.
///
/// Cloning yields another handle to the same registry.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use flowtrack::execution::{TrackerConfig, WorkflowTracker};
/// use flowtrack::storage::MemoryStore;
/// use flowtrack::workflow::sample_steps;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let tracker = WorkflowTracker::demo(TrackerConfig::default(), Arc::new(MemoryStore::new()));
///     let mut events = tracker.events();
///
///     tracker.start("workflow_1", sample_steps().steps).await?;
///     while let Ok(event) = events.recv().await {
///         println!("{:?}", event);
///         if event.is_final() {
///             break;
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct WorkflowTracker {
    shared: Arc<Shared>,
    source: Arc<dyn SignalSource>,
    trigger: Arc<dyn WorkflowTrigger>,
}

impl WorkflowTracker {
    /// Creates a tracker with explicit collaborators.
    pub fn new(
        config: TrackerConfig,
        source: Arc<dyn SignalSource>,
        trigger: Arc<dyn WorkflowTrigger>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let monitor = FallbackMonitor::new(config.fallback_timeout);

        Self {
            shared: Arc::new(Shared {
                config,
                monitor,
                clock: Clock::new(),
                store,
                events,
                registry: Mutex::new(HashMap::new()),
                store_lock: Mutex::new(()),
            }),
            source,
            trigger,
        }
    }

    /// Creates a tracker with no signal source and no backend, where every
    /// step is synthesized.
    pub fn demo(config: TrackerConfig, store: Arc<dyn SnapshotStore>) -> Self {
        Self::new(
            config,
            Arc::new(UnavailableSource),
            Arc::new(NoopTrigger),
            store,
        )
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }

    /// Current tracker time.
    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    /// Subscribes to status events.
    pub fn events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.shared.events.subscribe()
    }

    /// Starts tracking a new instance.
    pub async fn start(
        &self,
        instance_id: &str,
        steps: Vec<StepDescriptor>,
    ) -> Result<(), TrackerError> {
        self.start_titled(instance_id, None, steps).await
    }

    /// Starts tracking a new instance with a display title.
    ///
    /// The instance is `running` before the first await. Configuration
    /// errors leave the registry untouched; a failed trigger moves the
    /// instance to `error` and is returned as [`TrackerError::TriggerFailed`].
    pub async fn start_titled(
        &self,
        instance_id: &str,
        title: Option<String>,
        steps: Vec<StepDescriptor>,
    ) -> Result<(), TrackerError> {
        let now = self.shared.clock.now();
        let total_steps = steps.len();
        let trigger_steps = steps.clone();

        {
            let mut registry = self.shared.registry();
            if registry.contains_key(instance_id) {
                return Err(TrackerError::DuplicateInstance(instance_id.to_string()));
            }

            let mut state = ExecutionState::create(instance_id, steps, now)?.with_title(title);
            state.transition(Status::Running)?;

            let mut timeline = ExecutionTimeline::new(now);
            timeline.add_event(EventType::Started, now);

            registry.insert(
                instance_id.to_string(),
                TrackedInstance::new(state, timeline),
            );
        }

        info!("Starting workflow {} ({} steps)", instance_id, total_steps);
        self.shared.emit(TrackerEvent::Started {
            instance_id: instance_id.to_string(),
            total_steps,
        });

        if self.source.check_availability().await {
            self.open_subscription(instance_id);
        } else {
            warn!(
                "Signal source not available, running {} in demo mode",
                instance_id
            );
            self.shared.emit(TrackerEvent::Degraded {
                instance_id: instance_id.to_string(),
                reason: "signal source unavailable".to_string(),
            });
        }

        if let Err(e) = self.trigger.trigger(instance_id, &trigger_steps).await {
            let cause = e.to_string();
            error!("Failed to start workflow {}: {}", instance_id, cause);

            // Cancelled while the trigger was in flight: nothing left to fail.
            if let Err(err) = self.fail(instance_id, cause.clone()) {
                debug!("Could not mark {} as failed: {}", instance_id, err);
            }

            return Err(TrackerError::TriggerFailed {
                instance_id: instance_id.to_string(),
                cause,
            });
        }

        self.spawn_ticks(instance_id);
        Ok(())
    }

    /// Pauses a running instance. Returns false if it was not running.
    pub fn pause(&self, instance_id: &str) -> Result<bool, TrackerError> {
        let now = self.shared.clock.now();

        let buffered = {
            let mut registry = self.shared.registry();
            let instance = registry
                .get_mut(instance_id)
                .ok_or_else(|| TrackerError::UnknownInstance(instance_id.to_string()))?;

            if instance.state.status() != Status::Running {
                debug!(
                    "Ignoring pause for {} while {}",
                    instance_id,
                    instance.state.status()
                );
                return Ok(false);
            }

            instance.state.transition(Status::Paused)?;
            instance.timeline.add_event(EventType::Paused, now);

            // Must land before any snapshot removal by `finish`.
            self.shared.persist(&instance.state);
            instance.queue.len()
        };

        info!(
            "Workflow {} paused ({} signals buffered)",
            instance_id, buffered
        );
        self.shared.emit(TrackerEvent::Paused {
            instance_id: instance_id.to_string(),
        });
        Ok(true)
    }

    /// Resumes a paused instance. Returns false if it was not paused.
    ///
    /// The fallback window restarts, so time spent paused never triggers
    /// synthesis.
    pub fn resume(&self, instance_id: &str) -> Result<bool, TrackerError> {
        let now = self.shared.clock.now();

        {
            let mut registry = self.shared.registry();
            let instance = registry
                .get_mut(instance_id)
                .ok_or_else(|| TrackerError::UnknownInstance(instance_id.to_string()))?;

            if instance.state.status() != Status::Paused {
                debug!(
                    "Ignoring resume for {} while {}",
                    instance_id,
                    instance.state.status()
                );
                return Ok(false);
            }

            instance.state.transition(Status::Running)?;
            instance.state.touch(now);
            instance.timeline.add_event(EventType::Resumed, now);
            self.shared.persist(&instance.state);
        }

        info!("Workflow {} resumed", instance_id);
        self.shared.emit(TrackerEvent::Resumed {
            instance_id: instance_id.to_string(),
        });
        Ok(true)
    }

    /// Moves an instance to `error`, tears it down and archives it.
    pub fn fail(&self, instance_id: &str, cause: impl Into<String>) -> Result<(), TrackerError> {
        let now = self.shared.clock.now();

        let instance = {
            let mut registry = self.shared.registry();
            let instance = registry
                .get_mut(instance_id)
                .ok_or_else(|| TrackerError::UnknownInstance(instance_id.to_string()))?;
            instance.state.transition(Status::Error)?;
            registry.remove(instance_id)
        };

        if let Some(instance) = instance {
            self.shared.finish(instance, now, Some(cause.into()));
        }
        Ok(())
    }

    /// Stops tracking an instance without archiving it.
    pub fn cancel(&self, instance_id: &str) -> Result<(), TrackerError> {
        let mut instance = self
            .shared
            .registry()
            .remove(instance_id)
            .ok_or_else(|| TrackerError::UnknownInstance(instance_id.to_string()))?;

        instance.release();
        self.shared.forget_snapshot(instance_id);

        info!(
            "Workflow {} cancelled at {}",
            instance_id,
            instance.state.progress()
        );
        self.shared.emit(TrackerEvent::Cancelled {
            instance_id: instance_id.to_string(),
        });
        Ok(())
    }

    /// Rehydrates instances from persisted snapshots.
    ///
    /// Snapshots are hints: instances already in the registry keep their
    /// live state, and terminal or inconsistent snapshots are discarded.
    /// Recovered instances get a fresh subscription and fallback window but
    /// are not triggered again. Returns the recovered instance ids.
    pub async fn recover(&self) -> Result<Vec<String>, TrackerError> {
        let snapshots = archive::load_snapshots(self.shared.store.as_ref())?;
        let now = self.shared.clock.now();
        let mut recovered = Vec::new();

        for mut state in snapshots {
            let instance_id = state.instance_id.clone();

            if state.status().is_terminal() || !state.is_consistent() {
                warn!(
                    "Discarding stale snapshot for {} ({})",
                    instance_id,
                    state.status()
                );
                self.shared.forget_snapshot(&instance_id);
                continue;
            }

            if state.status() == Status::Idle {
                state.transition(Status::Running)?;
            }
            state.touch(now);

            let mut timeline = ExecutionTimeline::new(state.started_at());
            timeline.add_event(EventType::Resumed, now);

            let inserted = {
                let mut registry = self.shared.registry();
                if registry.contains_key(&instance_id) {
                    false
                } else {
                    registry.insert(instance_id.clone(), TrackedInstance::new(state, timeline));
                    true
                }
            };

            if inserted {
                info!("Recovered workflow {}", instance_id);
                recovered.push(instance_id);
            } else {
                debug!("Workflow {} already active; keeping live state", instance_id);
            }
        }

        if recovered.is_empty() {
            return Ok(recovered);
        }

        let available = self.source.check_availability().await;
        for instance_id in &recovered {
            if available {
                self.open_subscription(instance_id);
            } else {
                self.shared.emit(TrackerEvent::Degraded {
                    instance_id: instance_id.clone(),
                    reason: "signal source unavailable".to_string(),
                });
            }
            self.spawn_ticks(instance_id);
        }

        Ok(recovered)
    }

    /// Stops every instance's ticks and subscription, saving snapshots so a
    /// later [`WorkflowTracker::recover`] can pick them up.
    pub fn shutdown(&self) {
        let instances: Vec<TrackedInstance> = self
            .shared
            .registry()
            .drain()
            .map(|(_, instance)| instance)
            .collect();

        let count = instances.len();
        for mut instance in instances {
            instance.release();
            self.shared.persist(&instance.state);
        }

        info!("Tracker shut down ({} instances saved)", count);
    }

    /// Returns a copy of an instance's state.
    pub fn get(&self, instance_id: &str) -> Option<ExecutionState> {
        self.shared
            .registry()
            .get(instance_id)
            .map(|instance| instance.state.clone())
    }

    pub fn progress(&self, instance_id: &str) -> Option<Progress> {
        self.shared
            .registry()
            .get(instance_id)
            .map(|instance| instance.state.progress())
    }

    /// Number of buffered signals for an instance.
    pub fn queue_len(&self, instance_id: &str) -> Option<usize> {
        self.shared
            .registry()
            .get(instance_id)
            .map(|instance| instance.queue.len())
    }

    /// Returns a copy of an instance's timeline.
    pub fn timeline(&self, instance_id: &str) -> Option<ExecutionTimeline> {
        self.shared
            .registry()
            .get(instance_id)
            .map(|instance| instance.timeline.clone())
    }

    /// Ids of all tracked instances, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.registry().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// True if any instance is running or paused.
    pub fn has_active_workflows(&self) -> bool {
        self.shared
            .registry()
            .values()
            .any(|instance| instance.state.status().is_active())
    }

    fn open_subscription(&self, instance_id: &str) {
        let shared = Arc::downgrade(&self.shared);
        let key = instance_id.to_string();
        let handler: SignalHandler = Arc::new(move |signal: StepSignal| {
            if let Some(shared) = shared.upgrade() {
                shared.enqueue_signal(&key, signal);
            }
        });

        match self.source.subscribe(instance_id, handler) {
            Ok(subscription) => {
                let orphan = {
                    let mut registry = self.shared.registry();
                    match registry.get_mut(instance_id) {
                        Some(instance) => {
                            instance.subscription = Some(subscription);
                            None
                        }
                        None => Some(subscription),
                    }
                };

                if let Some(subscription) = orphan {
                    subscription.unsubscribe();
                }
            }
            Err(e) => {
                warn!(
                    "Subscription for {} failed ({}); continuing on fallback",
                    instance_id, e
                );
                self.shared.emit(TrackerEvent::Degraded {
                    instance_id: instance_id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn spawn_ticks(&self, instance_id: &str) {
        let period = self.shared.config.tick_interval;

        // Fallback ticks run half a period after drain ticks so a drain
        // that refreshed `last_signal_at` is always seen first.
        let handles = TickHandles {
            drain: spawn_tick_loop(
                Arc::downgrade(&self.shared),
                instance_id.to_string(),
                period,
                Duration::ZERO,
                TickKind::Drain,
            ),
            fallback: spawn_tick_loop(
                Arc::downgrade(&self.shared),
                instance_id.to_string(),
                period,
                period / 2,
                TickKind::Fallback,
            ),
        };

        let orphan = {
            let mut registry = self.shared.registry();
            match registry.get_mut(instance_id) {
                Some(instance) => instance.ticks.replace(handles),
                None => Some(handles),
            }
        };

        if let Some(handles) = orphan {
            handles.abort();
        }
    }
}

fn spawn_tick_loop(
    shared: Weak<Shared>,
    instance_id: String,
    period: Duration,
    offset: Duration,
    kind: TickKind,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period + offset, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(shared) = shared.upgrade() else {
                break;
            };
            let now = shared.clock.now();

            let keep_going = match kind {
                TickKind::Drain => shared.drain_tick(&instance_id, now),
                TickKind::Fallback => shared.fallback_tick(&instance_id, now),
            };

            if !keep_going {
                debug!("{:?} tick for {} stopped", kind, instance_id);
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{ChannelSource, SignalError};
    use crate::storage::{MemoryStore, SNAPSHOTS_KEY};
    use crate::execution::trigger::TriggerError;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    fn steps(n: u32) -> Vec<StepDescriptor> {
        (1..=n)
            .map(|i| StepDescriptor::new(i, "act", format!("Step {}", i)))
            .collect()
    }

    fn drain_events(rx: &mut broadcast::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    struct FailingTrigger;

    #[async_trait]
    impl WorkflowTrigger for FailingTrigger {
        async fn trigger(
            &self,
            _instance_id: &str,
            _steps: &[StepDescriptor],
        ) -> Result<(), TriggerError> {
            Err(TriggerError::new("HTTP error! status: 503"))
        }
    }

    struct RefusingSource;

    #[async_trait]
    impl SignalSource for RefusingSource {
        async fn check_availability(&self) -> bool {
            true
        }

        fn subscribe(
            &self,
            instance_id: &str,
            _on_signal: SignalHandler,
        ) -> Result<Subscription, SignalError> {
            Err(SignalError::SubscribeFailed {
                instance_id: instance_id.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn channel_tracker(config: TrackerConfig) -> (WorkflowTracker, ChannelSource, Arc<MemoryStore>) {
        let source = ChannelSource::new();
        let store = Arc::new(MemoryStore::new());
        let tracker = WorkflowTracker::new(
            config,
            Arc::new(source.clone()),
            Arc::new(NoopTrigger),
            store.clone(),
        );
        (tracker, source, store)
    }

    #[test]
    fn test_config_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.fallback_timeout(), Duration::from_secs(5));
        assert_eq!(config.catch_up_per_tick(), 1);
    }

    #[test]
    fn test_config_clamps() {
        let config = TrackerConfig::default()
            .with_tick_interval(Duration::ZERO)
            .with_catch_up_per_tick(0);
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
        assert_eq!(config.catch_up_per_tick(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_sets_running() {
        let tracker = WorkflowTracker::demo(TrackerConfig::default(), Arc::new(MemoryStore::new()));
        let mut rx = tracker.events();

        tracker.start("wf-1", steps(3)).await.unwrap();

        let state = tracker.get("wf-1").unwrap();
        assert_eq!(state.status(), Status::Running);
        assert!(tracker.has_active_workflows());
        assert_eq!(tracker.active_ids(), vec!["wf-1".to_string()]);

        let events = drain_events(&mut rx);
        assert!(matches!(events[0], TrackerEvent::Started { total_steps: 3, .. }));
        assert!(matches!(events[1], TrackerEvent::Degraded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_duplicate() {
        let (tracker, _source, _store) = channel_tracker(TrackerConfig::default());
        tracker.start("wf-1", steps(2)).await.unwrap();
        tracker.pause("wf-1").unwrap();

        let result = tracker.start("wf-1", steps(5)).await;
        assert!(matches!(result, Err(TrackerError::DuplicateInstance(_))));

        let existing = tracker.get("wf-1").unwrap();
        assert_eq!(existing.steps().len(), 2);
        assert_eq!(existing.status(), Status::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_empty_steps() {
        let tracker = WorkflowTracker::demo(TrackerConfig::default(), Arc::new(MemoryStore::new()));

        let result = tracker.start("wf-1", vec![]).await;
        assert!(matches!(result, Err(TrackerError::InvalidConfig(_))));
        assert!(tracker.get("wf-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_failure_routes_to_error() {
        let store = Arc::new(MemoryStore::new());
        let tracker = WorkflowTracker::new(
            TrackerConfig::default(),
            Arc::new(UnavailableSource),
            Arc::new(FailingTrigger),
            store.clone(),
        );
        let mut rx = tracker.events();

        let result = tracker.start("wf-1", steps(3)).await;
        match result {
            Err(TrackerError::TriggerFailed { cause, .. }) => {
                assert_eq!(cause, "HTTP error! status: 503")
            }
            other => panic!("expected TriggerFailed, got {:?}", other),
        }

        assert!(tracker.get("wf-1").is_none());
        let history = archive::load_history(store.as_ref()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state.status(), Status::Error);
        assert_eq!(history[0].summary.outcome, Outcome::Failed);

        let events = drain_events(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackerEvent::Failed { cause, .. } if cause.contains("503"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_failure_degrades() {
        let tracker = WorkflowTracker::new(
            TrackerConfig::default(),
            Arc::new(RefusingSource),
            Arc::new(NoopTrigger),
            Arc::new(MemoryStore::new()),
        );
        let mut rx = tracker.events();

        tracker.start("wf-1", steps(2)).await.unwrap();

        assert_eq!(tracker.get("wf-1").unwrap().status(), Status::Running);
        let events = drain_events(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            TrackerEvent::Degraded { reason, .. } if reason.contains("connection refused")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_applies_one_per_tick() {
        let (tracker, source, _store) = channel_tracker(TrackerConfig::default());
        tracker.start("wf-1", steps(3)).await.unwrap();

        for step in [1, 2, 3] {
            source.publish("wf-1", StepSignal::now(step));
        }
        assert_eq!(tracker.queue_len("wf-1"), Some(3));

        let now = tracker.now();
        assert!(tracker.shared.drain_tick("wf-1", now));
        assert_eq!(tracker.get("wf-1").unwrap().completed_steps().len(), 1);
        assert_eq!(tracker.queue_len("wf-1"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_applies_several_per_tick() {
        let config = TrackerConfig::default().with_catch_up_per_tick(2);
        let (tracker, source, _store) = channel_tracker(config);
        tracker.start("wf-1", steps(5)).await.unwrap();

        for step in [1, 2, 3] {
            source.publish("wf-1", StepSignal::now(step));
        }

        assert!(tracker.shared.drain_tick("wf-1", tracker.now()));
        assert_eq!(tracker.get("wf-1").unwrap().completed_steps().len(), 2);
        assert_eq!(tracker.queue_len("wf-1"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_signal_consumes_tick() {
        let (tracker, source, _store) = channel_tracker(TrackerConfig::default());
        tracker.start("wf-1", steps(3)).await.unwrap();

        source.publish("wf-1", StepSignal::now(1));
        source.publish("wf-1", StepSignal::now(1));
        source.publish("wf-1", StepSignal::now(2));

        let now = tracker.now();
        tracker.shared.drain_tick("wf-1", now);
        tracker.shared.drain_tick("wf-1", now);
        assert_eq!(tracker.get("wf-1").unwrap().completed_steps().len(), 1);

        tracker.shared.drain_tick("wf-1", now);
        assert_eq!(tracker.get("wf-1").unwrap().completed_steps().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_signal_ignored() {
        let (tracker, source, _store) = channel_tracker(TrackerConfig::default());
        tracker.start("wf-1", steps(3)).await.unwrap();

        source.publish("wf-1", StepSignal::now(9));
        source.publish_raw("wf-1", r#"{"step": "x"}"#);

        assert_eq!(tracker.queue_len("wf-1"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_drain_keeps_buffer() {
        let (tracker, source, _store) = channel_tracker(TrackerConfig::default());
        tracker.start("wf-1", steps(3)).await.unwrap();
        assert!(tracker.pause("wf-1").unwrap());

        source.publish("wf-1", StepSignal::now(1));
        assert!(tracker.shared.drain_tick("wf-1", tracker.now()));

        assert_eq!(tracker.queue_len("wf-1"), Some(1));
        assert!(tracker.get("wf-1").unwrap().completed_steps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_fallback() {
        let tracker = WorkflowTracker::demo(TrackerConfig::default(), Arc::new(MemoryStore::new()));
        tracker.start("wf-1", steps(3)).await.unwrap();
        tracker.pause("wf-1").unwrap();

        let much_later = tracker.now() + ChronoDuration::hours(1);
        tracker.shared.fallback_tick("wf-1", much_later);
        assert!(tracker.get("wf-1").unwrap().completed_steps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_resets_fallback_window() {
        let tracker = WorkflowTracker::demo(TrackerConfig::default(), Arc::new(MemoryStore::new()));
        tracker.start("wf-1", steps(3)).await.unwrap();
        tracker.pause("wf-1").unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(tracker.resume("wf-1").unwrap());

        let resumed_at = tracker.get("wf-1").unwrap().last_signal_at();
        tracker.shared.fallback_tick("wf-1", resumed_at + ChronoDuration::seconds(1));
        assert!(tracker.get("wf-1").unwrap().completed_steps().is_empty());

        tracker.shared.fallback_tick("wf-1", resumed_at + ChronoDuration::seconds(6));
        assert_eq!(tracker.get("wf-1").unwrap().synthesized_steps().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_before_fallback_in_same_tick() {
        let (tracker, source, _store) = channel_tracker(TrackerConfig::default());
        tracker.start("wf-1", steps(3)).await.unwrap();
        source.publish("wf-1", StepSignal::now(2));

        let stalled = tracker.now() + ChronoDuration::seconds(10);
        tracker.shared.drain_tick("wf-1", stalled);
        tracker.shared.fallback_tick("wf-1", stalled);

        let state = tracker.get("wf-1").unwrap();
        assert_eq!(state.completed_steps().len(), 1);
        assert!(state.synthesized_steps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_noops() {
        let tracker = WorkflowTracker::demo(TrackerConfig::default(), Arc::new(MemoryStore::new()));
        tracker.start("wf-1", steps(2)).await.unwrap();

        assert!(!tracker.resume("wf-1").unwrap());
        assert!(tracker.pause("wf-1").unwrap());
        assert!(!tracker.pause("wf-1").unwrap());
        assert!(matches!(
            tracker.pause("missing"),
            Err(TrackerError::UnknownInstance(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_persist_snapshot() {
        let (tracker, _source, store) = channel_tracker(TrackerConfig::default());
        tracker.start("wf-1", steps(2)).await.unwrap();
        assert!(store.get(SNAPSHOTS_KEY).unwrap().is_none());

        tracker.pause("wf-1").unwrap();
        let snapshots = archive::load_snapshots(store.as_ref()).unwrap();
        assert_eq!(snapshots[0].status(), Status::Paused);

        tracker.resume("wf-1").unwrap();
        let snapshots = archive::load_snapshots(store.as_ref()).unwrap();
        assert_eq!(snapshots[0].status(), Status::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_tears_down() {
        let (tracker, source, store) = channel_tracker(TrackerConfig::default());
        let mut rx = tracker.events();
        tracker.start("wf-1", steps(2)).await.unwrap();
        assert_eq!(source.subscriber_count("wf-1"), 1);

        source.publish("wf-1", StepSignal::now(2));
        source.publish("wf-1", StepSignal::now(1));
        let now = tracker.now();
        assert!(tracker.shared.drain_tick("wf-1", now));
        assert!(!tracker.shared.drain_tick("wf-1", now));

        assert!(tracker.get("wf-1").is_none());
        assert!(!tracker.has_active_workflows());
        assert_eq!(source.subscriber_count("wf-1"), 0);

        let history = archive::load_history(store.as_ref()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].summary.outcome, Outcome::Completed);
        assert!(archive::load_snapshots(store.as_ref()).unwrap().is_empty());

        let events = drain_events(&mut rx);
        assert!(matches!(events.last(), Some(TrackerEvent::Completed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_running_instance() {
        let (tracker, source, store) = channel_tracker(TrackerConfig::default());
        tracker.start("wf-1", steps(2)).await.unwrap();

        tracker.fail("wf-1", "backend crashed").unwrap();

        assert!(tracker.get("wf-1").is_none());
        assert_eq!(source.subscriber_count("wf-1"), 0);
        let history = archive::load_history(store.as_ref()).unwrap();
        assert_eq!(history[0].summary.cause.as_deref(), Some("backend crashed"));
        assert!(matches!(tracker.fail("wf-1", "again"), Err(TrackerError::UnknownInstance(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_archive() {
        let (tracker, source, store) = channel_tracker(TrackerConfig::default());
        tracker.start("wf-1", steps(2)).await.unwrap();
        tracker.pause("wf-1").unwrap();

        tracker.cancel("wf-1").unwrap();

        assert!(tracker.get("wf-1").is_none());
        assert_eq!(source.subscriber_count("wf-1"), 0);
        assert!(archive::load_history(store.as_ref()).unwrap().is_empty());
        assert!(archive::load_snapshots(store.as_ref()).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_rehydrates_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let mut paused = ExecutionState::create("wf-paused", steps(3), now).unwrap();
        paused.transition(Status::Running).unwrap();
        paused.apply_completion(1, false, now);
        paused.transition(Status::Paused).unwrap();
        archive::save_snapshot(store.as_ref(), &paused).unwrap();

        let mut done = ExecutionState::create("wf-done", steps(1), now).unwrap();
        done.transition(Status::Running).unwrap();
        done.apply_completion(1, false, now);
        archive::save_snapshot(store.as_ref(), &done).unwrap();

        let source = ChannelSource::new();
        let tracker = WorkflowTracker::new(
            TrackerConfig::default(),
            Arc::new(source.clone()),
            Arc::new(NoopTrigger),
            store.clone(),
        );

        let recovered = tracker.recover().await.unwrap();
        assert_eq!(recovered, vec!["wf-paused".to_string()]);

        let state = tracker.get("wf-paused").unwrap();
        assert_eq!(state.status(), Status::Paused);
        assert!(state.completed_steps().contains(&1));
        assert_eq!(source.subscriber_count("wf-paused"), 1);

        let remaining = archive::load_snapshots(store.as_ref()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].instance_id, "wf-paused");

        // A second pass finds the instance already live.
        assert!(tracker.recover().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_saves_snapshots() {
        let (tracker, source, store) = channel_tracker(TrackerConfig::default());
        tracker.start("wf-1", steps(2)).await.unwrap();

        tracker.shutdown();

        assert!(tracker.active_ids().is_empty());
        assert_eq!(source.subscriber_count("wf-1"), 0);
        let snapshots = archive::load_snapshots(store.as_ref()).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].status(), Status::Running);
    }

    #[test]
    fn test_event_helpers() {
        let event = TrackerEvent::Cancelled {
            instance_id: "wf-9".to_string(),
        };
        assert_eq!(event.instance_id(), "wf-9");
        assert!(event.is_final());
        assert!(!TrackerEvent::Paused {
            instance_id: "wf-9".to_string()
        }
        .is_final());
    }
}
