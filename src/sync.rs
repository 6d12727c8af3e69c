//! Refresh cycles against the remote gateway.
//!
//! Every refresh is one transaction with observable phases
//! `Requested -> Succeeded | Failed`, published on a broadcast channel.  A
//! bulk refresh is all-or-nothing: if any course fails, or the bulk listing
//! does not cover exactly the requested courses, no feed is produced.
//!
//! The orchestrator does not retry and does not touch the annotation store.
//!
//! ## Concurrency
//!
//! Refreshes are independent and may run in parallel.  Two overlapping
//! `refresh_all` calls are *not* coalesced; a caller that needs every
//! published feed to come from a single point in time must not issue
//! overlapping calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{FetchError, SyncError};
use crate::merge::{self, CourseDirectory};
use crate::source::{ContentGateway, ContentItem, ContentType};

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 64;

/// What a refresh covered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshScope {
    Course(String),
    All(Vec<String>),
}

impl RefreshScope {
    /// Course ids whose slice of the feed this refresh replaces.
    pub fn course_ids(&self) -> Vec<String> {
        match self {
            RefreshScope::Course(id) => vec![id.clone()],
            RefreshScope::All(ids) => ids.clone(),
        }
    }
}

/// Lifecycle event of one refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Requested {
        scope: RefreshScope,
        kind: ContentType,
    },
    Succeeded {
        scope: RefreshScope,
        kind: ContentType,
        items: Vec<ContentItem>,
    },
    Failed {
        scope: RefreshScope,
        kind: ContentType,
        error: SyncError,
    },
}

/// Drives per-course and bulk refreshes.
pub struct SyncOrchestrator {
    gateway: Arc<dyn ContentGateway>,
    directory: CourseDirectory,
    kind: ContentType,
    timeout: Duration,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncOrchestrator {
    pub fn new(
        gateway: Arc<dyn ContentGateway>,
        directory: CourseDirectory,
        kind: ContentType,
        timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gateway,
            directory,
            kind,
            timeout,
            events,
        }
    }

    pub fn kind(&self) -> ContentType {
        self.kind
    }

    pub fn directory(&self) -> &CourseDirectory {
        &self.directory
    }

    /// Subscribe to lifecycle events of refreshes started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Refresh a single course.
    pub async fn refresh_course(&self, course_id: &str) -> Result<Vec<ContentItem>, SyncError> {
        let scope = RefreshScope::Course(course_id.to_string());
        self.run(scope, async {
            let items = self
                .bounded(self.gateway.fetch_course_content(course_id, self.kind))
                .await?;
            let raw = std::iter::once((course_id.to_string(), items)).collect();
            Ok::<_, SyncError>(merge::merge(raw, &self.directory)?)
        })
        .await
    }

    /// Refresh every course in `course_ids` as one unit.
    pub async fn refresh_all(&self, course_ids: &[String]) -> Result<Vec<ContentItem>, SyncError> {
        let scope = RefreshScope::All(course_ids.to_vec());
        self.run(scope, async {
            let raw = self
                .bounded(self.gateway.fetch_all_courses_content(course_ids, self.kind))
                .await?;
            if let Some(missing) = course_ids.iter().find(|id| !raw.contains_key(*id)) {
                return Err(SyncError::from(FetchError::MalformedResponse(format!(
                    "bulk listing has no entry for course {missing}"
                ))));
            }
            if let Some(extra) = raw.keys().find(|id| !course_ids.contains(*id)) {
                return Err(SyncError::from(FetchError::MalformedResponse(format!(
                    "bulk listing has unrequested course {extra}"
                ))));
            }
            Ok::<_, SyncError>(merge::merge(raw, &self.directory)?)
        })
        .await
    }

    async fn run<F>(&self, scope: RefreshScope, work: F) -> Result<Vec<ContentItem>, SyncError>
    where
        F: Future<Output = Result<Vec<ContentItem>, SyncError>>,
    {
        debug!(?scope, kind = %self.kind, gateway = self.gateway.name(), "refresh requested");
        self.emit(SyncEvent::Requested {
            scope: scope.clone(),
            kind: self.kind,
        });

        let result = work.await;

        match &result {
            Ok(items) => {
                info!(?scope, kind = %self.kind, count = items.len(), "refresh succeeded");
                self.emit(SyncEvent::Succeeded {
                    scope,
                    kind: self.kind,
                    items: items.clone(),
                });
            }
            Err(error) => {
                warn!(?scope, kind = %self.kind, %error, "refresh failed");
                self.emit(SyncEvent::Failed {
                    scope,
                    kind: self.kind,
                    error: error.clone(),
                });
            }
        }
        result
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, FetchError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
