//! File-Backed Snapshot Store
//!
//! Each key is stored as `{state_dir}/{key}.json`. The state directory
//! defaults to `.flowtrack` in the current directory and can be moved with
//! the `FLOWTRACK_STATE_DIR` environment variable.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};
use once_cell::sync::Lazy;
use serde_json::Value;

use super::{SnapshotStore, StoreError};

/// Lazily-resolved default state directory.
pub static DEFAULT_STATE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    // Priority 1: Explicit override
    if let Ok(dir) = std::env::var("FLOWTRACK_STATE_DIR") {
        if !dir.trim().is_empty() {
            info!("Using state directory from FLOWTRACK_STATE_DIR: {}", dir);
            return PathBuf::from(dir);
        }
    }

    // Priority 2: Current working directory
    PathBuf::from(".flowtrack")
});

/// Distinguishes temp files of concurrent writers within this process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Snapshot store writing one JSON document per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!("Snapshot store at {}", dir.display());
        Ok(Self { dir })
    }

    /// Opens the store at [`DEFAULT_STATE_DIR`].
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(DEFAULT_STATE_DIR.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file path used for `key`.
    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        self.dir.join(format!("{}.json", name))
    }
}

impl SnapshotStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension(format!(
            "json.{}-{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        // Write then rename so readers never see a half-written document.
        fs::write(&tmp, serde_json::to_string_pretty(&value)?)?;
        fs::rename(&tmp, &path)?;

        debug!("Saved {} to {}", key, path.display());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
