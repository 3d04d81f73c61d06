//! Tracker error types.

use thiserror::Error;

use crate::storage::StoreError;
use crate::workflow::{InvalidTransition, ValidationError};

/// Errors returned by [`WorkflowTracker`](super::WorkflowTracker) calls.
///
/// An unreachable signal source or a failed subscription is not an error:
/// the instance degrades to fallback synthesis instead.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid workflow configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("workflow instance '{0}' is already active")]
    DuplicateInstance(String),

    #[error("unknown workflow instance '{0}'")]
    UnknownInstance(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("failed to trigger workflow '{instance_id}': {cause}")]
    TriggerFailed { instance_id: String, cause: String },

    #[error("snapshot store error: {0}")]
    Store(#[from] StoreError),
}
