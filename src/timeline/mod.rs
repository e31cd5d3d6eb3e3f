//! Read-only, cross-feed projection of merged items.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::domain::{Item, ItemKey, Page, TimelineEntry, TimelineFilter};
use crate::state::StateStore;

pub struct Timeline {
    state: Arc<StateStore>,
}

impl Timeline {
    pub fn new(state: Arc<StateStore>) -> Self {
        Self { state }
    }

    /// Entries matching `filter`, newest first, sliced by `page`.
    pub fn view(&self, filter: TimelineFilter, page: Page) -> Vec<TimelineEntry> {
        self.state.read(|library| {
            let mut items: Vec<&Item> = library
                .items()
                .filter(|i| filter.matches(i, library.feed(i.feed_id)))
                .collect();
            items.sort_by(|a, b| timeline_order(a, b));

            items
                .into_iter()
                .skip(page.offset)
                .take(page.limit)
                .map(|item| TimelineEntry::compose(item, library.feed(item.feed_id)))
                .collect()
        })
    }

    pub fn len(&self, filter: &TimelineFilter) -> usize {
        self.state.read(|library| {
            library
                .items()
                .filter(|i| filter.matches(i, library.feed(i.feed_id)))
                .count()
        })
    }

    pub fn get(&self, key: &ItemKey) -> Option<TimelineEntry> {
        self.state.read(|library| {
            library
                .item(key)
                .map(|item| TimelineEntry::compose(item, library.feed(item.feed_id)))
        })
    }
}

/// Newest first; equal times fall back to stable id, then feed id.
pub fn timeline_order(a: &Item, b: &Item) -> Ordering {
    b.sort_time()
        .cmp(&a.sort_time())
        .then_with(|| a.stable_id.cmp(&b.stable_id))
        .then_with(|| a.feed_id.cmp(&b.feed_id))
}
