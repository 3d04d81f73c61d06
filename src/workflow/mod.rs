//! Workflow Definition Module
//!
//! Provides the step model, step file loading, validation and the
//! per-instance execution state.
//!
//! # Structure
//!
//! - [`model`]: Step descriptors and step lists
//! - [`parser`]: YAML/JSON step file loading
//! - [`validator`]: Sequence number validation
//! - [`state`]: Execution state and status transitions

pub mod model;
pub mod parser;
pub mod state;
pub mod validator;

pub use model::{sample_steps, StepDescriptor, StepList};
pub use parser::{load_steps, parse_steps, save_steps};
pub use state::{ExecutionState, InvalidTransition, Progress, Status};
pub use validator::{validate_steps, ValidationError};
