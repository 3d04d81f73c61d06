//! Monitoring Module
//!
//! Provides the per-instance execution timeline used for run summaries
//! and progress charts.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Step completion timing, pauses and outcome

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
