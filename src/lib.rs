//! coursefeed — content synchronisation and offline file cache for a
//! course learning-platform client.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌───────────┐  RawItem  ┌──────────┐ ContentItem ┌──────────┐  flags  ┌──────────────┐
//! │  source/  │ ────────► │  merge   │ ──────────► │   feed   │ ◄────── │ annotations  │
//! │ (gateway) │           └──────────┘             └──────────┘         └──────────────┘
//! └───────────┘                ▲
//!       ▲                      │ refresh_course / refresh_all
//!       └──────────────── ┌──────────┐ ◄── poll (timer)
//!                         │   sync   │ ──► SyncEvent (broadcast)
//!                         └──────────┘
//!
//! ┌───────────┐  FileRef   ┌────────────────────┐  .part + rename  ┌───────────┐
//! │  caller   │ ─────────► │ download (manager) │ ───────────────► │ cache dir │
//! └───────────┘ ◄───────── └────────────────────┘                  └───────────┘
//!                progress        │ FileFetcher
//! ```
//!
//! * **`source/`** — the `ContentGateway` trait, item types, HTTP gateway.
//! * **`merge`** — decorates raw listings with course metadata and orders them.
//! * **`feed`** — the deduplicated feed and its decoration with user flags.
//! * **`annotations`** — pinned / favorite / unread / archived flags.
//! * **`sync`** — refresh transactions and their lifecycle events.
//! * **`poll`** — periodic bulk refresh on a background task.
//! * **`download/`** — single-flight file cache with progress and retries.
//! * **`config`**, **`persist`**, **`error`** — plumbing.

pub mod annotations;
pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod merge;
pub mod persist;
pub mod poll;
pub mod source;
pub mod sync;

pub use annotations::{AnnotationFlags, AnnotationStore, Flag};
pub use download::{
    DownloadSettings, DownloadState, DownloadTask, EnsureOptions, FileDownloadManager, FileRef,
    PreviewSession,
};
pub use error::{DownloadError, FetchError, MergeError, SyncError};
pub use feed::{AnnotatedItem, Feed, FeedView};
pub use merge::{CourseDirectory, CourseInfo};
pub use source::{ContentGateway, ContentItem, ContentType, RawItem};
pub use sync::{SyncEvent, SyncOrchestrator};
