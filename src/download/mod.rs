//! On-device cache of remote files.
//!
//! [`FileDownloadManager::ensure`] turns a [`FileRef`] into a local path,
//! downloading only when needed.  Per file identity it runs the state machine
//!
//! ```text
//!            ensure()                ok
//!   Idle ───────────────► Downloading ───► Completed
//!                            ▲   │              │
//!              ensure()      │   │ err          │ ensure(force)
//!   Failed ◄─────────────────┼───┘              │
//!     └──────────────────────┘◄─────────────────┘
//! ```
//!
//! and guarantees at most one transfer in flight per identity: concurrent
//! callers attach to the running transfer and all receive its result.
//!
//! A transfer runs on its own tokio task.  If every caller goes away the
//! transfer still finishes and fills the cache; progress for the departed
//! callers is simply not delivered.  A transfer that panics counts as a
//! failed attempt.
//!
//! Files are written to `<dest>.part` and renamed into place on success, so
//! a failed re-download leaves the previous artifact untouched.

mod fetcher;
mod index;
mod preview;

pub use fetcher::{ByteProgress, FileFetcher, HttpFetcher};
pub use index::{CacheEntry, CacheIndex};
pub use preview::{PreviewSession, MAX_PREVIEW_RELOADS};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{DownloadError, StoreError};

/// Name of the index file inside the cache directory.
const INDEX_FILE: &str = "index.json";

/// Hex characters of the identity hash kept in local file names.
const NAME_HASH_LEN: usize = 12;

// ---------------------------------------------------------------------------
// File references and identities
// ---------------------------------------------------------------------------

/// A remote file as the platform describes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub url: String,
    pub name: String,
    pub ext: String,
}

impl FileRef {
    pub fn new(url: impl Into<String>, name: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            ext: ext.into(),
        }
    }

    /// Stable key derived from url, name and extension.
    pub fn identity(&self) -> FileIdentity {
        let mut hasher = Sha256::new();
        for part in [&self.url, &self.name, &self.ext] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        FileIdentity(hex::encode(hasher.finalize()))
    }

    /// Deterministic name of the cached file: `<name>-<hash>.<ext>`.
    pub fn local_file_name(&self) -> String {
        let identity = self.identity();
        let stem = sanitize(&self.name);
        let hash = &identity.as_str()[..NAME_HASH_LEN];
        match sanitize(&self.ext) {
            ext if ext.is_empty() => format!("{stem}-{hash}"),
            ext => format!("{stem}-{hash}.{ext}"),
        }
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.ext)
    }
}

/// Keep file names portable: anything outside `[A-Za-z0-9._-]` becomes `_`.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

/// Hex SHA-256 over a file's url, name and extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIdentity(String);

impl FileIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Task state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    Downloading,
    Completed,
    Failed,
}

/// Snapshot of one file identity's task.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub identity: FileIdentity,
    pub state: DownloadState,
    /// Fraction in `[0, 1]` of the current or last attempt.
    pub progress: f64,
    /// Set only while `Completed`.
    pub local_path: Option<PathBuf>,
    /// Network attempts made so far, across forced refreshes.
    pub attempt_count: u32,
}

/// Receivers shared by every caller attached to one transfer.
#[derive(Clone)]
struct Inflight {
    progress: watch::Receiver<f64>,
    outcome: watch::Receiver<Option<Result<PathBuf, DownloadError>>>,
}

impl Inflight {
    /// The transfer task is gone without having published an outcome.
    fn is_abandoned(&self) -> bool {
        self.outcome.has_changed().is_err() && self.outcome.borrow().is_none()
    }
}

struct TaskEntry {
    state: DownloadState,
    progress: f64,
    local_path: Option<PathBuf>,
    attempt_count: u32,
    inflight: Option<Inflight>,
}

impl TaskEntry {
    fn idle() -> Self {
        Self {
            state: DownloadState::Idle,
            progress: 0.0,
            local_path: None,
            attempt_count: 0,
            inflight: None,
        }
    }

    fn complete(&mut self, path: PathBuf) {
        self.state = DownloadState::Completed;
        self.progress = 1.0;
        self.local_path = Some(path);
        self.inflight = None;
    }

    fn fail(&mut self) {
        if let Some(inflight) = &self.inflight {
            self.progress = *inflight.progress.borrow();
        }
        self.state = DownloadState::Failed;
        self.local_path = None;
        self.inflight = None;
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-call options for [`FileDownloadManager::ensure`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsureOptions {
    /// Download again even if a cached artifact exists.
    pub force: bool,
    /// If the download fails but an older artifact is on disk, return it.
    pub allow_stale: bool,
    /// Override the manager's attempt ceiling for this call.
    pub max_attempts: Option<u32>,
}

/// Manager-wide download policy.
#[derive(Debug, Clone, Copy)]
pub struct DownloadSettings {
    /// Network attempts allowed per file identity.
    pub max_attempts: u32,
    /// Upper bound on one transfer.
    pub timeout: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            timeout: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Single-flight, disk-backed file cache.
pub struct FileDownloadManager {
    inner: Arc<Inner>,
}

struct Inner {
    fetcher: Arc<dyn FileFetcher>,
    cache_dir: PathBuf,
    settings: DownloadSettings,
    tasks: Mutex<HashMap<FileIdentity, TaskEntry>>,
    index: CacheIndex,
}

impl FileDownloadManager {
    /// Create a manager caching into `cache_dir`, loading its index.
    pub fn new(
        fetcher: Arc<dyn FileFetcher>,
        cache_dir: impl Into<PathBuf>,
        settings: DownloadSettings,
    ) -> Result<Self, StoreError> {
        let cache_dir = cache_dir.into();
        let index = CacheIndex::load(cache_dir.join(INDEX_FILE))?;
        debug!(dir = %cache_dir.display(), entries = index.len(), "opened file cache");
        Ok(Self {
            inner: Arc::new(Inner {
                fetcher,
                cache_dir,
                settings,
                tasks: Mutex::new(HashMap::new()),
                index,
            }),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    pub fn index(&self) -> &CacheIndex {
        &self.inner.index
    }

    /// Where `file` is (or would be) cached.
    pub fn local_path(&self, file: &FileRef) -> PathBuf {
        self.inner.cache_dir.join(file.local_file_name())
    }

    /// Path of a usable cached artifact for `file`, if there is one.
    pub fn cached_path(&self, file: &FileRef) -> Option<PathBuf> {
        let path = self.local_path(file);
        path.is_file().then_some(path)
    }

    /// Snapshot of the task for `identity`, if one was ever created.
    pub fn task(&self, identity: &FileIdentity) -> Option<DownloadTask> {
        let tasks = self.inner.tasks.lock();
        tasks.get(identity).map(|entry| DownloadTask {
            identity: identity.clone(),
            state: entry.state,
            progress: match &entry.inflight {
                Some(inflight) => *inflight.progress.borrow(),
                None => entry.progress,
            },
            local_path: entry.local_path.clone(),
            attempt_count: entry.attempt_count,
        })
    }

    /// Progress stream of the transfer currently running for `identity`.
    ///
    /// Dropping the receiver never affects the transfer.
    pub fn progress(&self, identity: &FileIdentity) -> Option<watch::Receiver<f64>> {
        let tasks = self.inner.tasks.lock();
        tasks
            .get(identity)
            .and_then(|entry| entry.inflight.as_ref())
            .map(|inflight| inflight.progress.clone())
    }

    /// Discard the task record for `identity`, resetting its attempt count.
    ///
    /// The cached file, if any, stays on disk.
    pub fn forget(&self, identity: &FileIdentity) {
        self.inner.tasks.lock().remove(identity);
    }

    /// Make sure `file` is cached locally and return its path.
    ///
    /// `on_progress` receives a non-decreasing sequence of fractions in
    /// `[0, 1]`, starting from the current attempt's progress and ending at
    /// `1.0` on success.
    pub async fn ensure(
        &self,
        file: &FileRef,
        opts: EnsureOptions,
        mut on_progress: impl FnMut(f64),
    ) -> Result<PathBuf, DownloadError> {
        let identity = file.identity();
        let dest = self.local_path(file);
        let max_attempts = opts.max_attempts.unwrap_or(self.inner.settings.max_attempts);

        // `None` means a cache hit.
        let inflight = {
            let mut tasks = self.inner.tasks.lock();
            let entry = tasks.entry(identity.clone()).or_insert_with(TaskEntry::idle);

            if entry.inflight.as_ref().is_some_and(Inflight::is_abandoned) {
                warn!(%file, "previous transfer ended without a result");
                entry.fail();
            }

            if let Some(inflight) = &entry.inflight {
                debug!(%file, "attaching to in-flight download");
                Some(inflight.clone())
            } else if !opts.force && dest.is_file() {
                debug!(%file, path = %dest.display(), "cache hit");
                entry.complete(dest.clone());
                None
            } else if entry.attempt_count >= max_attempts {
                warn!(%file, attempts = entry.attempt_count, "attempt ceiling reached");
                return Err(DownloadError::MaxRetriesExceeded {
                    attempts: entry.attempt_count,
                });
            } else {
                Some(self.inner.start(entry, identity.clone(), file, dest.clone()))
            }
        };

        let Some(inflight) = inflight else {
            self.inner.backfill_index(&identity, &dest).await;
            on_progress(1.0);
            return Ok(dest);
        };

        let outcome = wait_for_outcome(inflight, &file.url, &mut on_progress).await;
        match outcome {
            Ok(path) => Ok(path),
            Err(err) if opts.allow_stale && dest.is_file() => {
                warn!(%file, error = %err, "download failed, serving stale copy");
                Ok(dest)
            }
            Err(err) => Err(err),
        }
    }
}

impl Inner {
    /// Begin a new attempt.  Called with the task map locked.
    fn start(
        self: &Arc<Self>,
        entry: &mut TaskEntry,
        identity: FileIdentity,
        file: &FileRef,
        dest: PathBuf,
    ) -> Inflight {
        entry.state = DownloadState::Downloading;
        entry.progress = 0.0;
        entry.local_path = None;
        entry.attempt_count += 1;

        let (progress_tx, progress_rx) = watch::channel(0.0);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let inflight = Inflight {
            progress: progress_rx,
            outcome: outcome_rx,
        };
        entry.inflight = Some(inflight.clone());

        info!(%file, attempt = entry.attempt_count, "starting download");
        let inner = Arc::clone(self);
        let url = file.url.clone();
        let progress_tx = Arc::new(progress_tx);
        tokio::spawn(async move {
            let transfer = tokio::spawn({
                let inner = Arc::clone(&inner);
                let url = url.clone();
                let dest = dest.clone();
                let progress_tx = Arc::clone(&progress_tx);
                async move { inner.transfer(&url, &dest, &progress_tx).await }
            });
            let result = match transfer.await {
                Ok(result) => result,
                Err(e) => {
                    let part = dest.with_extension(part_extension(&dest));
                    let _ = tokio::fs::remove_file(&part).await;
                    Err(DownloadError::Network {
                        url,
                        reason: format!("transfer aborted: {e}"),
                    })
                }
            };
            inner.finish(&identity, &result).await;
            // Set the outcome before the progress sender drops.
            outcome_tx.send_replace(Some(result));
            drop(progress_tx);
        });

        inflight
    }

    async fn transfer(
        &self,
        url: &str,
        dest: &Path,
        progress_tx: &watch::Sender<f64>,
    ) -> Result<PathBuf, DownloadError> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| DownloadError::io(&self.cache_dir, e))?;

        let part = dest.with_extension(part_extension(dest));
        let report = |written: u64, total: Option<u64>| {
            let Some(total) = total.filter(|&t| t > 0) else {
                return;
            };
            let fraction = (written as f64 / total as f64).clamp(0.0, 1.0);
            progress_tx.send_if_modified(|current| {
                if fraction > *current {
                    *current = fraction;
                    true
                } else {
                    false
                }
            });
        };

        let fetched =
            tokio::time::timeout(self.settings.timeout, self.fetcher.fetch(url, &part, &report))
                .await;
        let result = match fetched {
            Ok(Ok(_bytes)) => tokio::fs::rename(&part, dest)
                .await
                .map_err(|e| DownloadError::io(dest, e)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(DownloadError::Timeout(self.settings.timeout)),
        };

        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        } else {
            progress_tx.send_replace(1.0);
        }
        result.map(|()| dest.to_path_buf())
    }

    /// Record the terminal state of an attempt.
    async fn finish(
        self: &Arc<Self>,
        identity: &FileIdentity,
        result: &Result<PathBuf, DownloadError>,
    ) {
        match result {
            Ok(path) => {
                info!(%identity, path = %path.display(), "download completed");
                self.record_in_index(identity, path).await;
            }
            Err(err) => warn!(%identity, error = %err, "download failed"),
        }

        let mut tasks = self.tasks.lock();
        // The record may have been forgotten meanwhile.
        if let Some(entry) = tasks.get_mut(identity) {
            match result {
                Ok(path) => entry.complete(path.clone()),
                Err(_) => entry.fail(),
            }
        }
    }

    async fn backfill_index(self: &Arc<Self>, identity: &FileIdentity, path: &Path) {
        if !self.index.contains(identity) {
            self.record_in_index(identity, path).await;
        }
    }

    async fn record_in_index(self: &Arc<Self>, identity: &FileIdentity, path: &Path) {
        let inner = Arc::clone(self);
        let id = identity.clone();
        let path = path.to_path_buf();
        match tokio::task::spawn_blocking(move || inner.index.record(&id, &path)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%identity, error = %e, "could not update cache index"),
            Err(e) => warn!(%identity, error = %e, "cache index write aborted"),
        }
    }
}

/// `pdf` -> `pdf.part`, no extension -> `part`.
fn part_extension(dest: &Path) -> String {
    match dest.extension() {
        Some(ext) => format!("{}.part", ext.to_string_lossy()),
        None => "part".to_string(),
    }
}

/// Follow one transfer to its end, forwarding progress.
async fn wait_for_outcome(
    mut inflight: Inflight,
    url: &str,
    on_progress: &mut impl FnMut(f64),
) -> Result<PathBuf, DownloadError> {
    let mut last = *inflight.progress.borrow_and_update();
    on_progress(last);
    let mut progress_open = true;

    let outcome = loop {
        if let Some(outcome) = inflight.outcome.borrow_and_update().clone() {
            break outcome;
        }
        tokio::select! {
            changed = inflight.progress.changed(), if progress_open => match changed {
                Ok(()) => {
                    let current = *inflight.progress.borrow_and_update();
                    if current > last {
                        last = current;
                        on_progress(current);
                    }
                }
                Err(_) => progress_open = false,
            },
            changed = inflight.outcome.changed() => {
                if changed.is_err() && inflight.outcome.borrow().is_none() {
                    break Err(DownloadError::Network {
                        url: url.to_string(),
                        reason: "download task ended without a result".to_string(),
                    });
                }
            }
        }
    };

    if outcome.is_ok() && last < 1.0 {
        on_progress(1.0);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Writes `body` in four progress steps after `delay`; fails while
    /// `failing` is set, after reaching 50% while `fail_midway` is set, and
    /// panics while `panicking` is set.  Counts every transfer it starts.
    struct MockFetcher {
        body: Vec<u8>,
        delay: Duration,
        failing: AtomicBool,
        fail_midway: AtomicBool,
        panicking: AtomicBool,
        transfers: AtomicUsize,
    }

    impl MockFetcher {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                body: b"%PDF-1.7 lecture notes".to_vec(),
                delay,
                failing: AtomicBool::new(false),
                fail_midway: AtomicBool::new(false),
                panicking: AtomicBool::new(false),
                transfers: AtomicUsize::new(0),
            })
        }

        fn transfers(&self) -> usize {
            self.transfers.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FileFetcher for MockFetcher {
        async fn fetch(
            &self,
            url: &str,
            dest: &Path,
            progress: ByteProgress<'_>,
        ) -> Result<u64, DownloadError> {
            self.transfers.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.panicking.load(Ordering::SeqCst) {
                panic!("fetcher blew up");
            }
            let reset = || DownloadError::Network {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            };
            if self.failing.load(Ordering::SeqCst) {
                return Err(reset());
            }
            let total = 100;
            if self.fail_midway.load(Ordering::SeqCst) {
                progress(50, Some(total));
                return Err(reset());
            }
            for step in 0..=4u64 {
                progress(step * 25, Some(total));
            }
            tokio::fs::write(dest, &self.body).await.unwrap();
            Ok(self.body.len() as u64)
        }
    }

    fn file() -> FileRef {
        FileRef::new("https://learn.example.edu/f/42", "Lecture 3: Parsing", "pdf")
    }

    fn manager(fetcher: Arc<MockFetcher>, dir: &TempDir) -> FileDownloadManager {
        FileDownloadManager::new(fetcher, dir.path(), DownloadSettings::default()).unwrap()
    }

    // -- identity ------------------------------------------------------------

    #[test]
    fn identity_is_stable_and_sensitive_to_every_part() {
        let a = file();
        assert_eq!(a.identity(), file().identity());
        assert_ne!(a.identity(), FileRef::new(&a.url, &a.name, "pptx").identity());
        assert_ne!(a.identity(), FileRef::new(&a.url, "Other", &a.ext).identity());
        assert_ne!(a.identity(), FileRef::new("https://x", &a.name, &a.ext).identity());
        // Boundaries between parts matter.
        assert_ne!(
            FileRef::new("ab", "c", "d").identity(),
            FileRef::new("a", "bc", "d").identity()
        );
    }

    #[test]
    fn local_file_name_is_sanitised_and_deterministic() {
        let name = file().local_file_name();
        assert!(name.starts_with("Lecture_3__Parsing-"));
        assert!(name.ends_with(".pdf"));
        assert_eq!(name, file().local_file_name());
        assert!(!FileRef::new("u", "../../etc/passwd", "").local_file_name().contains('/'));
    }

    // -- ensure --------------------------------------------------------------

    #[tokio::test]
    async fn concurrent_callers_share_one_transfer() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::from_millis(30));
        let mgr = manager(fetcher.clone(), &dir);
        let f = file();

        let (a, b, c) = tokio::join!(
            mgr.ensure(&f, EnsureOptions::default(), |_| {}),
            mgr.ensure(&f, EnsureOptions::default(), |_| {}),
            mgr.ensure(&f, EnsureOptions::default(), |_| {}),
        );

        assert_eq!(fetcher.transfers(), 1);
        let path = a.unwrap();
        assert_eq!(b.unwrap(), path);
        assert_eq!(c.unwrap(), path);
        assert_eq!(std::fs::read(&path).unwrap(), fetcher.body);
    }

    #[tokio::test]
    async fn second_ensure_is_a_cache_hit() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::ZERO);
        let mgr = manager(fetcher.clone(), &dir);

        let first = mgr.ensure(&file(), EnsureOptions::default(), |_| {}).await.unwrap();
        let second = mgr.ensure(&file(), EnsureOptions::default(), |_| {}).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.transfers(), 1);
        let task = mgr.task(&file().identity()).unwrap();
        assert_eq!(task.state, DownloadState::Completed);
        assert_eq!(task.local_path, Some(first));
        assert_eq!(task.attempt_count, 1);
    }

    #[tokio::test]
    async fn cache_survives_a_new_manager() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::ZERO);
        manager(fetcher.clone(), &dir)
            .ensure(&file(), EnsureOptions::default(), |_| {})
            .await
            .unwrap();

        let reopened = manager(fetcher.clone(), &dir);
        assert!(reopened.index().contains(&file().identity()));
        reopened
            .ensure(&file(), EnsureOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(fetcher.transfers(), 1);
    }

    #[tokio::test]
    async fn missing_cached_file_is_a_miss_not_an_error() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::ZERO);
        let mgr = manager(fetcher.clone(), &dir);

        let path = mgr.ensure(&file(), EnsureOptions::default(), |_| {}).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(mgr.cached_path(&file()).is_none());

        let again = mgr.ensure(&file(), EnsureOptions::default(), |_| {}).await.unwrap();
        assert_eq!(again, path);
        assert_eq!(fetcher.transfers(), 2);
    }

    #[tokio::test]
    async fn force_redownloads_and_keeps_counting_attempts() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::ZERO);
        let mgr = manager(fetcher.clone(), &dir);
        let force = EnsureOptions {
            force: true,
            ..Default::default()
        };

        mgr.ensure(&file(), EnsureOptions::default(), |_| {}).await.unwrap();
        mgr.ensure(&file(), force, |_| {}).await.unwrap();

        assert_eq!(fetcher.transfers(), 2);
        let task = mgr.task(&file().identity()).unwrap();
        assert_eq!(task.state, DownloadState::Completed);
        assert_eq!(task.attempt_count, 2);
    }

    #[tokio::test]
    async fn failure_is_surfaced_and_plain_ensure_retries() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::ZERO);
        fetcher.failing.store(true, Ordering::SeqCst);
        let mgr = manager(fetcher.clone(), &dir);

        let err = mgr.ensure(&file(), EnsureOptions::default(), |_| {}).await.unwrap_err();
        assert!(matches!(err, DownloadError::Network { .. }));
        let task = mgr.task(&file().identity()).unwrap();
        assert_eq!(task.state, DownloadState::Failed);
        assert!(task.local_path.is_none());
        assert!(mgr.cached_path(&file()).is_none(), "no partial file left behind");

        fetcher.failing.store(false, Ordering::SeqCst);
        mgr.ensure(&file(), EnsureOptions::default(), |_| {}).await.unwrap();
        assert_eq!(mgr.task(&file().identity()).unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn attempt_ceiling_stops_further_transfers() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::ZERO);
        fetcher.failing.store(true, Ordering::SeqCst);
        let mgr = manager(fetcher.clone(), &dir);
        let opts = EnsureOptions {
            max_attempts: Some(2),
            ..Default::default()
        };

        mgr.ensure(&file(), opts, |_| {}).await.unwrap_err();
        mgr.ensure(&file(), opts, |_| {}).await.unwrap_err();
        let err = mgr.ensure(&file(), opts, |_| {}).await.unwrap_err();

        assert_eq!(err, DownloadError::MaxRetriesExceeded { attempts: 2 });
        assert_eq!(fetcher.transfers(), 2);

        mgr.forget(&file().identity());
        fetcher.failing.store(false, Ordering::SeqCst);
        mgr.ensure(&file(), opts, |_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn progress_is_monotonic_from_zero_to_one() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(MockFetcher::new(Duration::from_millis(5)), &dir);

        let mut seen = Vec::new();
        mgr.ensure(&file(), EnsureOptions::default(), |p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert!(seen.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[tokio::test]
    async fn forced_attempt_restarts_progress_from_zero() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(MockFetcher::new(Duration::from_millis(20)), &dir);
        let f = file();
        let id = f.identity();

        mgr.ensure(&f, EnsureOptions::default(), |_| {}).await.unwrap();
        assert_eq!(mgr.task(&id).unwrap().progress, 1.0);

        let force = EnsureOptions {
            force: true,
            ..Default::default()
        };
        let mut seen = Vec::new();
        let (result, during) = tokio::join!(
            mgr.ensure(&f, force, |p| seen.push(p)),
            async { mgr.task(&id).unwrap() }
        );
        result.unwrap();

        assert_eq!(during.state, DownloadState::Downloading);
        assert_eq!(during.progress, 0.0);
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&1.0));
    }

    #[tokio::test]
    async fn retry_after_partial_failure_restarts_progress_from_zero() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::from_millis(20));
        fetcher.fail_midway.store(true, Ordering::SeqCst);
        let mgr = manager(fetcher.clone(), &dir);
        let f = file();
        let id = f.identity();

        let mut first = Vec::new();
        mgr.ensure(&f, EnsureOptions::default(), |p| first.push(p))
            .await
            .unwrap_err();
        let failed = mgr.task(&id).unwrap();
        assert_eq!(failed.state, DownloadState::Failed);
        assert_eq!(failed.progress, 0.5);

        fetcher.fail_midway.store(false, Ordering::SeqCst);
        let mut second = Vec::new();
        let (result, during) = tokio::join!(
            mgr.ensure(&f, EnsureOptions::default(), |p| second.push(p)),
            async { mgr.task(&id).unwrap().progress }
        );
        result.unwrap();

        assert_eq!(during, 0.0);
        assert_eq!(second.first(), Some(&0.0));
        assert!(second.windows(2).all(|w| w[0] <= w[1]), "{second:?}");
        assert_eq!(mgr.task(&id).unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn panicking_fetcher_fails_the_attempt_without_wedging_the_task() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::ZERO);
        fetcher.panicking.store(true, Ordering::SeqCst);
        let mgr = manager(fetcher.clone(), &dir);
        let f = file();

        let err = mgr.ensure(&f, EnsureOptions::default(), |_| {}).await.unwrap_err();
        assert!(matches!(err, DownloadError::Network { .. }));
        let task = mgr.task(&f.identity()).unwrap();
        assert_eq!(task.state, DownloadState::Failed);
        assert!(mgr.progress(&f.identity()).is_none());

        fetcher.panicking.store(false, Ordering::SeqCst);
        let path = mgr.ensure(&f, EnsureOptions::default(), |_| {}).await.unwrap();
        assert!(path.is_file());
        assert_eq!(fetcher.transfers(), 2);
    }

    #[tokio::test]
    async fn stale_copy_only_when_asked() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::ZERO);
        let mgr = manager(fetcher.clone(), &dir);
        let path = mgr.ensure(&file(), EnsureOptions::default(), |_| {}).await.unwrap();

        fetcher.failing.store(true, Ordering::SeqCst);
        let strict = EnsureOptions {
            force: true,
            ..Default::default()
        };
        assert!(mgr.ensure(&file(), strict, |_| {}).await.is_err());

        let lenient = EnsureOptions {
            force: true,
            allow_stale: true,
            ..Default::default()
        };
        assert_eq!(mgr.ensure(&file(), lenient, |_| {}).await.unwrap(), path);
        assert_eq!(std::fs::read(&path).unwrap(), fetcher.body, "old artifact intact");
        assert_eq!(
            mgr.task(&file().identity()).unwrap().state,
            DownloadState::Failed
        );
    }

    #[tokio::test]
    async fn slow_transfer_times_out() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::from_secs(30));
        let mgr = FileDownloadManager::new(
            fetcher,
            dir.path(),
            DownloadSettings {
                max_attempts: 3,
                timeout: Duration::from_millis(50),
            },
        )
        .unwrap();

        let err = mgr.ensure(&file(), EnsureOptions::default(), |_| {}).await.unwrap_err();
        assert_eq!(err, DownloadError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn departed_caller_still_fills_the_cache() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new(Duration::from_millis(50));
        let mgr = manager(fetcher.clone(), &dir);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            mgr.ensure(&file(), EnsureOptions::default(), |_| {}),
        )
        .await;
        assert!(abandoned.is_err(), "caller gave up early");

        let path = mgr.ensure(&file(), EnsureOptions::default(), |_| {}).await.unwrap();
        assert!(path.is_file());
        assert_eq!(fetcher.transfers(), 1);
    }

    #[tokio::test]
    async fn progress_stream_is_exposed_while_downloading() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(MockFetcher::new(Duration::from_millis(20)), &dir);
        let id = file().identity();
        assert!(mgr.progress(&id).is_none());

        let f = file();
        let (result, rx) = tokio::join!(
            mgr.ensure(&f, EnsureOptions::default(), |_| {}),
            async { mgr.progress(&id) }
        );
        result.unwrap();
        let rx = rx.expect("transfer was running");
        assert_eq!(*rx.borrow(), 1.0);
        assert!(mgr.progress(&id).is_none());
    }
}
