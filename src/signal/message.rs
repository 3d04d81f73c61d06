//! Step Signal Messages
//!
//! Wire format pushed by the workflow backend for every finished step:
//!
//! ```json
//! { "step": 3, "status": "completed", "timestamp": "2024-05-01T12:00:03Z" }
//! ```
//!
//! Connection handshakes (`{"type": "connected"}`) and malformed messages are
//! dropped rather than reported as errors.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A notification that one step of an instance finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSignal {
    /// Sequence number of the completed step
    pub step: u32,
    /// When the backend reported the completion
    pub timestamp: DateTime<Utc>,
}

impl StepSignal {
    pub fn new(step: u32, timestamp: DateTime<Utc>) -> Self {
        Self { step, timestamp }
    }

    /// Creates a signal stamped with the current time.
    pub fn now(step: u32) -> Self {
        Self::new(step, Utc::now())
    }

    /// Parses a raw push message.
    ///
    /// Returns `None` for handshakes, unparsable JSON and messages without a
    /// positive integer `step`. A missing or unparsable `timestamp` falls
    /// back to the time of receipt.
    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                debug!("Dropping malformed signal message: {}", e);
                return None;
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("connected") {
            debug!("Signal channel handshake received");
            return None;
        }

        let step = value
            .get("step")
            .and_then(Value::as_u64)
            .filter(|step| *step > 0)
            .and_then(|step| u32::try_from(step).ok())?;

        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Some(Self::new(step, timestamp))
    }
}
