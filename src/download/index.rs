//! Persisted record of completed downloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use tracing::warn;

use super::FileIdentity;
use crate::error::StoreError;
use crate::persist;

/// Where a completed download lives and when it finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub local_path: PathBuf,
    pub completed_at: DateTime<Utc>,
}

/// File identity to [`CacheEntry`], flushed to disk on every change.
///
/// The index is advisory: a listed file that has since vanished from disk is
/// a cache miss, not an error, and an unreadable index starts out empty.
///
/// Writes are blocking; async callers go through `spawn_blocking`.
#[derive(Debug, Default)]
pub struct CacheIndex {
    entries: Mutex<HashMap<String, CacheEntry>>,
    // Held across snapshot and write so flushes land in mutation order.
    flush: Mutex<()>,
    path: Option<PathBuf>,
}

impl CacheIndex {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match persist::read_json(&path) {
            Ok(entries) => entries,
            Err(StoreError::Serde { source, .. }) => {
                warn!(
                    path = %path.display(),
                    error = %source,
                    "cache index unreadable, starting empty"
                );
                HashMap::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            entries: Mutex::new(entries),
            flush: Mutex::new(()),
            path: Some(path),
        })
    }

    pub fn get(&self, identity: &FileIdentity) -> Option<CacheEntry> {
        self.entries.lock().get(identity.as_str()).cloned()
    }

    pub fn contains(&self, identity: &FileIdentity) -> bool {
        self.entries.lock().contains_key(identity.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Record a completed download and flush.
    pub fn record(&self, identity: &FileIdentity, local_path: &Path) -> Result<(), StoreError> {
        let _flush = self.flush.lock();
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.insert(
                identity.as_str().to_string(),
                CacheEntry {
                    local_path: local_path.to_path_buf(),
                    completed_at: Utc::now(),
                },
            );
            entries.clone()
        };
        self.write(&snapshot)
    }

    /// Forget an entry and flush.
    pub fn remove(&self, identity: &FileIdentity) -> Result<(), StoreError> {
        let _flush = self.flush.lock();
        let snapshot = {
            let mut entries = self.entries.lock();
            if entries.remove(identity.as_str()).is_none() {
                return Ok(());
            }
            entries.clone()
        };
        self.write(&snapshot)
    }

    fn write(&self, snapshot: &HashMap<String, CacheEntry>) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => persist::write_json(path, snapshot),
            None => Ok(()),
        }
    }
}
