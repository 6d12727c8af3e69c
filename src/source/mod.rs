//! Remote content gateway abstraction.
//!
//! This module defines the [`ContentGateway`] trait and the item types every
//! gateway produces.  Concrete gateways live in sub-modules (currently only
//! [`http`]).
//!
//! ## For contributors — adding a new gateway
//!
//! 1. Create a new file in this directory (e.g. `fixture.rs`).
//! 2. Define a struct and implement [`ContentGateway`] for it.  Only
//!    [`fetch_course_content`](ContentGateway::fetch_course_content) is
//!    required; the bulk call has a default built on top of it.
//! 3. Add `mod fixture;` below and re-export your struct.
//!
//! The merge step, the orchestrator and the feed are all gateway-agnostic.

mod content_item;
mod http;

pub use content_item::{ContentItem, RawItem};
pub use http::HttpGateway;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// The kinds of per-course content the platform exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Notification,
    File,
    Homework,
    Discussion,
    Question,
}

impl ContentType {
    /// Path segment used by the platform's listing endpoints.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Notification => "notification",
            ContentType::File => "file",
            ContentType::Homework => "homework",
            ContentType::Discussion => "discussion",
            ContentType::Question => "question",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notification" | "notice" => Ok(ContentType::Notification),
            "file" => Ok(ContentType::File),
            "homework" => Ok(ContentType::Homework),
            "discussion" => Ok(ContentType::Discussion),
            "question" => Ok(ContentType::Question),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Trait that every remote content gateway must implement.
///
/// The orchestrator calls gateways from async tasks, possibly from several
/// at once, so implementations must be `Send + Sync`.
#[async_trait]
pub trait ContentGateway: Send + Sync {
    /// Human-readable label used in log lines.
    fn name(&self) -> &str;

    /// Fetch one course's listing of the given kind.
    async fn fetch_course_content(
        &self,
        course_id: &str,
        kind: ContentType,
    ) -> Result<Vec<RawItem>, FetchError>;

    /// Fetch listings for several courses as one unit.
    ///
    /// Any single course failing fails the whole call.  The default issues
    /// the per-course calls concurrently.
    async fn fetch_all_courses_content(
        &self,
        course_ids: &[String],
        kind: ContentType,
    ) -> Result<HashMap<String, Vec<RawItem>>, FetchError> {
        let listings = try_join_all(course_ids.iter().map(|id| async move {
            let items = self.fetch_course_content(id, kind).await?;
            Ok::<_, FetchError>((id.clone(), items))
        }))
        .await?;
        Ok(listings.into_iter().collect())
    }
}
