//! Background refresh cycles.
//!
//! Runs on a tokio task, periodically calling
//! [`SyncOrchestrator::refresh_all`] and sending each outcome to the caller
//! over an [`mpsc`] channel.
//!
//! ## For contributors
//!
//! The poller refreshes sequentially: the next cycle starts only after the
//! previous one finished, so its own refreshes never overlap.  If you also
//! call `refresh_all` elsewhere for the same courses, those calls are not
//! coordinated with this loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::SyncError;
use crate::source::ContentItem;
use crate::sync::SyncOrchestrator;

/// Messages sent from the poller task to its consumer.
#[derive(Debug)]
pub enum PollMsg {
    /// A successful bulk refresh returned this feed.
    Items(Vec<ContentItem>),
    /// A bulk refresh failed; no feed was produced.
    Error(SyncError),
}

/// Spawn the background polling task.
///
/// The first refresh happens immediately.  The task runs until the returned
/// receiver is dropped.
pub fn spawn(
    orchestrator: Arc<SyncOrchestrator>,
    course_ids: Vec<String>,
    interval: Duration,
) -> (mpsc::Receiver<PollMsg>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(4);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let msg = match orchestrator.refresh_all(&course_ids).await {
                Ok(items) => PollMsg::Items(items),
                Err(e) => PollMsg::Error(e),
            };
            // If the receiver is gone the consumer has exited;
            // silently stop polling.
            if tx.send(msg).await.is_err() {
                return;
            }
        }
    });

    (rx, handle)
}
