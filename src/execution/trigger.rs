//! Workflow Trigger
//!
//! The single outbound call made when an instance starts: the ordered step
//! list is handed to the backend, and only success or failure matters.

use async_trait::async_trait;
use log::debug;
use thiserror::Error;

use crate::workflow::StepDescriptor;

/// Failure to kick off remote execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TriggerError(pub String);

impl TriggerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Starts remote execution of a workflow.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    async fn trigger(&self, instance_id: &str, steps: &[StepDescriptor])
        -> Result<(), TriggerError>;
}

/// Serializes steps into the request body the backend expects.
pub fn trigger_payload(steps: &[StepDescriptor]) -> Result<String, serde_json::Error> {
    serde_json::to_string(steps)
}

/// Trigger that succeeds without contacting anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrigger;

#[async_trait]
impl WorkflowTrigger for NoopTrigger {
    async fn trigger(
        &self,
        instance_id: &str,
        steps: &[StepDescriptor],
    ) -> Result<(), TriggerError> {
        let payload = trigger_payload(steps).map_err(|e| TriggerError::new(e.to_string()))?;
        debug!(
            "No backend configured for {}; skipping trigger ({} bytes)",
            instance_id,
            payload.len()
        );
        Ok(())
    }
}
