use std::collections::{HashMap, HashSet};

use crate::annotations::{AnnotationFlags, AnnotationStore};
use crate::source::ContentItem;

/// A feed item paired with its user-local flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedItem {
    pub item: ContentItem,
    pub flags: AnnotationFlags,
}

/// Which decorated items to show, and in what order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedView {
    /// Leave archived items out.
    pub hide_archived: bool,
    /// Move pinned items to the top, keeping feed order within each group.
    pub pinned_first: bool,
}

/// The canonical, reverse-chronological feed.
#[derive(Debug, Default)]
pub struct Feed {
    /// Unique by id, sorted by [`ContentItem`]'s `Ord`.
    items: Vec<ContentItem>,
    /// id -> position in `items`; rebuilt after every sort.
    index: HashMap<String, usize>,
}

impl Feed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ContentItem> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    /// Upsert newly-fetched items and re-sort.
    ///
    /// An incoming item replaces any existing item with the same id in full.
    pub fn merge_items(&mut self, new_items: Vec<ContentItem>) {
        for item in new_items {
            match self.index.get(&item.id) {
                Some(&i) => self.items[i] = item,
                None => {
                    self.index.insert(item.id.clone(), self.items.len());
                    self.items.push(item);
                }
            }
        }
        self.resort();
    }

    /// Replace everything the feed holds for `course_ids` with `fresh`.
    ///
    /// Items of those courses that are not in `fresh` are dropped; other
    /// courses are untouched.
    pub fn replace_courses(&mut self, course_ids: &[String], fresh: Vec<ContentItem>) {
        let replaced: HashSet<&str> = course_ids.iter().map(String::as_str).collect();
        self.items
            .retain(|item| !replaced.contains(item.course_id.as_str()));
        self.reindex();
        self.merge_items(fresh);
    }

    /// Decorate the feed with flags from `store` (read-only).
    pub fn annotated(&self, store: &AnnotationStore, view: FeedView) -> Vec<AnnotatedItem> {
        let mut out: Vec<AnnotatedItem> = self
            .items
            .iter()
            .map(|item| AnnotatedItem {
                flags: store.get(&item.id),
                item: item.clone(),
            })
            .filter(|a| !(view.hide_archived && a.flags.archived))
            .collect();

        if view.pinned_first {
            // Stable sort keeps the chronological order inside each group.
            out.sort_by_key(|a| !a.flags.pinned);
        }
        out
    }

    fn resort(&mut self) {
        self.items.sort();
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.clone(), i))
            .collect();
    }
}
