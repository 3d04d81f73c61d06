//! Flowtrack - Workflow Execution Progress Tracker
//!
//! Tracks the progress of workflow instances that execute on a remote
//! backend. Completion signals arrive asynchronously and possibly out of
//! order; they are buffered per instance and applied at a steady cadence so
//! progress is observable step by step. When signals stop arriving the
//! tracker synthesizes progress so a run never appears frozen.
//!
//! # Architecture
//!
//! The library is organized into five main modules:
//!
//! - [`workflow`]: Step definitions, validation and per-instance state
//! - [`execution`]: The tracker with its drain and fallback ticks
//! - [`signal`]: Step completion messages and signal sources
//! - [`storage`]: Snapshot persistence and run history
//! - [`monitoring`]: Execution timeline and progress chart
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use flowtrack::execution::{TrackerConfig, WorkflowTracker};
//! use flowtrack::storage::FileStore;
//! use flowtrack::load_steps;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load step definitions from YAML
//!     let list = load_steps("steps.yaml")?;
//!
//!     // Create a tracker without a live signal source
//!     let store = Arc::new(FileStore::open_default()?);
//!     let tracker = WorkflowTracker::demo(TrackerConfig::default(), store);
//!
//!     // Start tracking
//!     tracker.start("workflow_1", list.steps).await?;
//!     Ok(())
//! }
//! ```

pub mod execution;
pub mod monitoring;
pub mod signal;
pub mod storage;
pub mod workflow;

// Re-export commonly used types
pub use execution::{TrackerConfig, TrackerError, TrackerEvent, WorkflowTracker};
pub use signal::{ChannelSource, StepSignal};
pub use workflow::model::{StepDescriptor, StepList};
pub use workflow::parser::load_steps;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "flowtrack";
