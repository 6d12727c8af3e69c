//! The item types shared by every gateway and by the merge step.
//!
//! A gateway produces [`RawItem`]s: what the platform knows about one notice,
//! assignment or file, without any course context.  The merge step turns each
//! of them into a [`ContentItem`] by attaching the owning course's display
//! metadata.  After that point a `ContentItem` is never mutated; a newer copy
//! of the same id replaces it wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One entry as returned by the platform for a single course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    /// Server-assigned id, stable across refreshes.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub publisher: String,
    pub publish_time: DateTime<Utc>,
    #[serde(default)]
    pub attachment_name: Option<String>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    /// Web link to the item on the platform.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub marked_important: bool,
}

/// A course entry, denormalised with the course's display metadata.
///
/// ## Sorting
///
/// `ContentItem` implements [`Ord`] for **reverse-chronological** ordering:
/// newer items sort first, and items published at the same instant sort by
/// `id` ascending so that repeated merges of the same input agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    pub course_id: String,
    pub course_name: String,
    pub course_teacher_name: String,
    pub publish_time: DateTime<Utc>,
    pub title: String,
    pub content: String,
    pub publisher: String,
    pub attachment_name: Option<String>,
    pub attachment_url: Option<String>,
    pub url: Option<String>,
    pub marked_important: bool,
}

impl ContentItem {
    /// Attach course metadata to a raw item.
    pub fn from_raw(raw: RawItem, course_id: &str, course_name: &str, teacher_name: &str) -> Self {
        Self {
            id: raw.id,
            course_id: course_id.to_string(),
            course_name: course_name.to_string(),
            course_teacher_name: teacher_name.to_string(),
            publish_time: raw.publish_time,
            title: raw.title,
            content: raw.content,
            publisher: raw.publisher,
            attachment_name: raw.attachment_name,
            attachment_url: raw.attachment_url,
            url: raw.url,
            marked_important: raw.marked_important,
        }
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment_url.is_some()
    }
}

// ---------------------------------------------------------------------------
// Ordering: newest first, then id ascending
// ---------------------------------------------------------------------------

impl Ord for ContentItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .publish_time
            .cmp(&self.publish_time)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ContentItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_item(id: &str, published: DateTime<Utc>) -> ContentItem {
        let raw = RawItem {
            id: id.to_string(),
            title: id.to_uppercase(),
            content: String::new(),
            publisher: "staff".to_string(),
            publish_time: published,
            attachment_name: None,
            attachment_url: None,
            url: None,
            marked_important: false,
        };
        ContentItem::from_raw(raw, "C1", "Compilers", "Dr. Knuth")
    }

    #[test]
    fn sort_reverse_chronological() {
        let old = make_item("1", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mid = make_item("2", Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap());
        let new = make_item("3", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());

        let mut items = vec![old, new, mid];
        items.sort();

        assert_eq!(items[0].id, "3", "newest first");
        assert_eq!(items[1].id, "2");
        assert_eq!(items[2].id, "1", "oldest last");
    }

    #[test]
    fn same_time_breaks_ties_by_id() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = make_item("a", ts);
        let b = make_item("b", ts);
        assert_eq!(a.cmp(&b), Ordering::Less);

        let mut items = vec![b, a];
        items.sort();
        assert_eq!(items[0].id, "a");
    }

    #[test]
    fn from_raw_carries_course_metadata() {
        let item = make_item("n1", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(item.course_id, "C1");
        assert_eq!(item.course_name, "Compilers");
        assert_eq!(item.course_teacher_name, "Dr. Knuth");
        assert_eq!(item.title, "N1");
        assert!(!item.has_attachment());
    }

    #[test]
    fn raw_item_decodes_camel_case_with_defaults() {
        let json = r#"{"id":"n7","title":"Exam","publishTime":"2025-03-01T08:00:00Z"}"#;
        let raw: RawItem = serde_json::from_str(json).unwrap();
        assert_eq!(raw.id, "n7");
        assert!(raw.content.is_empty());
        assert!(raw.attachment_url.is_none());
        assert!(!raw.marked_important);
    }
}
