//! A preview session over one cached file.
//!
//! The render surface that displays a downloaded file can crash mid-render.
//! Each session reloads it automatically a bounded number of times; past
//! that, the crash becomes a terminal [`DownloadError::PreviewCrashed`].

use std::path::PathBuf;

use tracing::warn;

use super::{EnsureOptions, FileDownloadManager, FileRef};
use crate::error::DownloadError;

/// Automatic reloads allowed per preview session.
pub const MAX_PREVIEW_RELOADS: u32 = 3;

#[derive(Debug, Clone)]
pub struct PreviewSession {
    file: FileRef,
    reloads: u32,
    max_reloads: u32,
}

impl PreviewSession {
    pub fn new(file: FileRef) -> Self {
        Self {
            file,
            reloads: 0,
            max_reloads: MAX_PREVIEW_RELOADS,
        }
    }

    pub fn file(&self) -> &FileRef {
        &self.file
    }

    pub fn reloads(&self) -> u32 {
        self.reloads
    }

    /// Ensure the file is cached and return its path.
    pub async fn open(
        &self,
        manager: &FileDownloadManager,
        on_progress: impl FnMut(f64),
    ) -> Result<PathBuf, DownloadError> {
        manager
            .ensure(&self.file, EnsureOptions::default(), on_progress)
            .await
    }

    /// Re-download the file even if it is cached.
    pub async fn refresh(
        &self,
        manager: &FileDownloadManager,
        on_progress: impl FnMut(f64),
    ) -> Result<PathBuf, DownloadError> {
        let opts = EnsureOptions {
            force: true,
            ..EnsureOptions::default()
        };
        manager.ensure(&self.file, opts, on_progress).await
    }

    /// Record a render crash.
    ///
    /// Returns the reload number to perform, or `PreviewCrashed` once the
    /// ceiling has been reached.
    pub fn on_render_crash(&mut self) -> Result<u32, DownloadError> {
        if self.reloads >= self.max_reloads {
            warn!(file = %self.file, reloads = self.reloads, "preview keeps crashing, giving up");
            return Err(DownloadError::PreviewCrashed {
                reloads: self.reloads,
            });
        }
        self.reloads += 1;
        warn!(file = %self.file, reload = self.reloads, "preview crashed, reloading");
        Ok(self.reloads)
    }
}
