//! Step List Validation
//!
//! Checks that a step list can be tracked:
//! - At least one step
//! - Sequence numbers are 1-based and unique
//! - Sequence numbers cover exactly `1..=n`

use std::collections::HashSet;

use log::{debug, warn};
use thiserror::Error;

use super::model::StepDescriptor;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workflow has no steps")]
    EmptyWorkflow,

    #[error("step sequence numbers start at 1, found step 0")]
    ZeroSequence,

    #[error("duplicate step sequence number: {0}")]
    DuplicateSequence(u32),

    #[error("step {step} is out of range for a workflow of {total} steps")]
    OutOfRange { step: u32, total: usize },
}

/// Validates a list of step descriptors.
///
/// Returns the first problem found. Missing headings are only warned about
/// since progress displays fall back to the sequence number.
pub fn validate_steps(steps: &[StepDescriptor]) -> Result<(), ValidationError> {
    if steps.is_empty() {
        return Err(ValidationError::EmptyWorkflow);
    }

    let total = steps.len();
    let mut seen = HashSet::with_capacity(total);

    for step in steps {
        if step.step == 0 {
            return Err(ValidationError::ZeroSequence);
        }

        if !seen.insert(step.step) {
            return Err(ValidationError::DuplicateSequence(step.step));
        }

        if step.step as usize > total {
            return Err(ValidationError::OutOfRange {
                step: step.step,
                total,
            });
        }

        if step.heading.trim().is_empty() {
            warn!("Step {} has no heading", step.step);
        }
    }

    debug!("Validated {} steps", total);
    Ok(())
}
