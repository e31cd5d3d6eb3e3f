use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Feed, FeedId, Item, ItemKey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineFilter {
    pub unread_only: bool,
    pub queued_only: bool,
    /// Restrict the view to a single feed.
    pub feed_id: Option<FeedId>,
    /// Restrict the view to feeds filed under this group.
    pub group: Option<String>,
}

impl TimelineFilter {
    pub fn unread() -> Self {
        Self {
            unread_only: true,
            ..Self::default()
        }
    }

    pub fn queued() -> Self {
        Self {
            queued_only: true,
            ..Self::default()
        }
    }

    pub fn in_group(name: impl Into<String>) -> Self {
        Self {
            group: Some(name.into()),
            ..Self::default()
        }
    }

    /// `feed` is the item's owning feed, needed for the group check.
    pub fn matches(&self, item: &Item, feed: Option<&Feed>) -> bool {
        if self.unread_only && item.read {
            return false;
        }
        if self.queued_only && !item.queued {
            return false;
        }
        if self.feed_id.is_some_and(|id| item.feed_id != id) {
            return false;
        }
        match &self.group {
            Some(group) => feed.and_then(|f| f.group.as_ref()) == Some(group),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
        }
    }

    /// Zero-based page number of `size` entries.
    pub fn numbered(number: usize, size: usize) -> Self {
        Self {
            offset: number.saturating_mul(size),
            limit: size,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub key: ItemKey,
    pub feed_title: String,
    pub title: String,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub read: bool,
    pub queued: bool,
}

impl TimelineEntry {
    pub fn compose(item: &Item, feed: Option<&Feed>) -> Self {
        Self {
            key: item.key(),
            feed_title: feed
                .map(|f| f.display_title().to_string())
                .unwrap_or_default(),
            title: item.display_title().to_string(),
            link: item.link.clone(),
            published_at: item.published_at,
            summary: item.summary.clone(),
            read: item.read,
            queued: item.queued,
        }
    }
}
