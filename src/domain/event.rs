use serde::Serialize;

use crate::domain::FeedId;

/// Feed health notifications for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    FeedRefreshed {
        feed_id: FeedId,
        new_items: usize,
        updated_items: usize,
        not_modified: bool,
    },
    FeedFailed {
        feed_id: FeedId,
        error: String,
        consecutive_failures: u32,
    },
    FeedDegraded {
        feed_id: FeedId,
        consecutive_failures: u32,
    },
}

impl StatusEvent {
    pub fn feed_id(&self) -> FeedId {
        match self {
            StatusEvent::FeedRefreshed { feed_id, .. }
            | StatusEvent::FeedFailed { feed_id, .. }
            | StatusEvent::FeedDegraded { feed_id, .. } => *feed_id,
        }
    }
}
