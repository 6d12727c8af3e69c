//! User-local flags on content items.
//!
//! The store is an owned object with an explicit lifecycle: build it empty
//! or [`load`](AnnotationStore::load) it at start-up, inject it where it is
//! needed, and [`flush`](AnnotationStore::flush) it before exit.  Nothing in
//! the sync path writes to it; the caller registers newly observed ids.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::persist;

/// Flags attached to one item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationFlags {
    pub pinned: bool,
    pub favorite: bool,
    pub unread: bool,
    pub archived: bool,
}

impl Default for AnnotationFlags {
    fn default() -> Self {
        Self {
            pinned: false,
            favorite: false,
            unread: true,
            archived: false,
        }
    }
}

impl AnnotationFlags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::Pinned => self.pinned,
            Flag::Favorite => self.favorite,
            Flag::Unread => self.unread,
            Flag::Archived => self.archived,
        }
    }

    fn set(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Pinned => self.pinned = value,
            Flag::Favorite => self.favorite = value,
            Flag::Unread => self.unread = value,
            Flag::Archived => self.archived = value,
        }
    }
}

/// Name of a single flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Pinned,
    Favorite,
    Unread,
    Archived,
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Flag::Pinned => "pinned",
            Flag::Favorite => "favorite",
            Flag::Unread => "unread",
            Flag::Archived => "archived",
        })
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pinned" | "pin" => Ok(Flag::Pinned),
            "favorite" | "fav" => Ok(Flag::Favorite),
            "unread" => Ok(Flag::Unread),
            "archived" | "archive" => Ok(Flag::Archived),
            other => Err(format!("unknown flag: {other}")),
        }
    }
}

/// Process-wide map of item id to [`AnnotationFlags`].
#[derive(Debug, Default)]
pub struct AnnotationStore {
    flags: RwLock<HashMap<String, AnnotationFlags>>,
    path: Option<PathBuf>,
}

impl AnnotationStore {
    /// An empty store that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store from `path`; a missing file gives an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let flags: HashMap<String, AnnotationFlags> = persist::read_json(&path)?;
        debug!(path = %path.display(), count = flags.len(), "loaded annotations");
        Ok(Self {
            flags: RwLock::new(flags),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the current flags to the backing file, if any.
    pub fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.flags.read().clone();
        persist::write_json(path, &snapshot)
    }

    /// Flags for `item_id`, or the defaults if it was never observed.
    ///
    /// Never creates an entry.
    pub fn get(&self, item_id: &str) -> AnnotationFlags {
        self.flags.read().get(item_id).copied().unwrap_or_default()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.flags.read().contains_key(item_id)
    }

    pub fn len(&self) -> usize {
        self.flags.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.read().is_empty()
    }

    /// Create default entries for ids not seen before.
    ///
    /// Returns how many entries were created.
    pub fn register<'a>(&self, item_ids: impl IntoIterator<Item = &'a str>) -> usize {
        let mut flags = self.flags.write();
        let mut created = 0;
        for id in item_ids {
            if !flags.contains_key(id) {
                flags.insert(id.to_string(), AnnotationFlags::default());
                created += 1;
            }
        }
        created
    }

    pub fn set_flag(&self, item_id: &str, flag: Flag, value: bool) {
        self.flags
            .write()
            .entry(item_id.to_string())
            .or_default()
            .set(flag, value);
    }

    /// Apply one flag to many ids under a single write lock, so readers
    /// see either none or all of the update.
    pub fn set_flag_bulk<S: AsRef<str>>(&self, item_ids: &[S], flag: Flag, value: bool) {
        let mut flags = self.flags.write();
        for id in item_ids {
            flags
                .entry(id.as_ref().to_string())
                .or_default()
                .set(flag, value);
        }
    }

    /// Drop every entry.
    pub fn reset(&self) {
        self.flags.write().clear();
    }
}
