//! Turning per-course raw listings into one ordered feed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::MergeError;
use crate::source::{ContentItem, RawItem};

/// Display metadata for one course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseInfo {
    pub name: String,
    pub teacher_name: String,
}

/// Course id to display metadata.  Must be fully populated before a merge.
pub type CourseDirectory = HashMap<String, CourseInfo>;

/// Decorate, concatenate and sort raw listings.
///
/// Within one course a later duplicate of an id replaces the earlier one in
/// full.  No deduplication is done across courses.  A course missing from
/// `directory` fails the whole merge.
pub fn merge(
    raw_by_course: HashMap<String, Vec<RawItem>>,
    directory: &CourseDirectory,
) -> Result<Vec<ContentItem>, MergeError> {
    let mut merged = Vec::new();

    for (course_id, raw_items) in raw_by_course {
        let info = directory
            .get(&course_id)
            .ok_or_else(|| MergeError::MissingCourseMetadata {
                course_id: course_id.clone(),
            })?;
        merged.extend(merge_course(&course_id, info, raw_items));
    }

    merged.sort();
    Ok(merged)
}

/// Decorate one course's listing, keeping the last copy of each id.
fn merge_course(course_id: &str, info: &CourseInfo, raw_items: Vec<RawItem>) -> Vec<ContentItem> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(raw_items.len());
    let mut items: Vec<ContentItem> = Vec::with_capacity(raw_items.len());

    for raw in raw_items {
        let item = ContentItem::from_raw(raw, course_id, &info.name, &info.teacher_name);
        match slots.get(&item.id) {
            Some(&slot) => items[slot] = item,
            None => {
                slots.insert(item.id.clone(), items.len());
                items.push(item);
            }
        }
    }

    items
}
