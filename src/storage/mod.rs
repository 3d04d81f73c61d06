//! Persistence Module
//!
//! The tracker persists through a narrow key/value interface so the core
//! logic runs the same against memory, files, or any other store.
//!
//! - [`memory`]: In-memory store for tests and embedding
//! - [`file`]: One JSON file per key inside a state directory
//! - [`archive`]: Snapshot collection and run history on top of a store

pub mod archive;
pub mod file;
pub mod memory;

use std::io;

use serde_json::Value;
use thiserror::Error;

pub use archive::{ArchivedRun, Outcome, RunSummary};
pub use file::{FileStore, DEFAULT_STATE_DIR};
pub use memory::MemoryStore;

/// Key of the collection holding in-flight instance snapshots.
pub const SNAPSHOTS_KEY: &str = "workflowSnapshots";

/// Key of the append-only run history.
pub const HISTORY_KEY: &str = "workflowRunHistory";

/// Errors raised by snapshot stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("value under '{0}' is not a list")]
    NotAList(String),
}

/// Key/value store for snapshots and history.
pub trait SnapshotStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Deletes `key`. Missing keys are not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Appends `value` to the JSON array stored under `key`, creating it if
    /// needed.
    fn append_to_list(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut items = match self.get(key)? {
            None => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(StoreError::NotAList(key.to_string())),
        };

        items.push(value);
        self.set(key, Value::Array(items))
    }
}
