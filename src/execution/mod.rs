//! Workflow Execution Module
//!
//! Tracks the progress of remotely executing workflow instances,
//! including signal buffering, fallback synthesis, and
//! pause/resume functionality.
//!
//! # Architecture
//!
//! - [`tracker`]: Orchestrator owning every active instance
//! - [`queue`]: Per-instance buffer of received step signals
//! - [`fallback`]: Stall detection and synthetic completion
//! - [`trigger`]: Outbound call that starts remote execution
//! - [`pause_flag`]: File-based pause/resume signaling

pub mod clock;
pub mod error;
pub mod fallback;
pub mod pause_flag;
pub mod queue;
pub mod tracker;
pub mod trigger;

pub use clock::Clock;
pub use error::TrackerError;
pub use fallback::{FallbackMonitor, DEFAULT_FALLBACK_TIMEOUT};
pub use pause_flag::{watch_pause_flag, PAUSE_CHECK_INTERVAL};
pub use queue::StepSignalQueue;
pub use tracker::{
    TrackerConfig, TrackerEvent, WorkflowTracker, DEFAULT_CATCH_UP_PER_TICK,
    DEFAULT_TICK_INTERVAL,
};
pub use trigger::{trigger_payload, NoopTrigger, TriggerError, WorkflowTrigger};
