pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::app::Result;
use crate::domain::{Feed, FeedId, Item, ItemKey};
use crate::merge::MergeOutcome;

pub use sqlite::{SqliteStore, SCHEMA_VERSION};

/// Everything that survives a restart, tagged with the layout version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub feeds: Vec<Feed>,
    pub items: Vec<Item>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            feeds: Vec::new(),
            items: Vec::new(),
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Durable backend behind [`crate::state::StateStore`].
///
/// Every method is a single atomic write or read.
pub trait Store: Send + Sync {
    /// Reads the whole persisted state; unreadable data is `CorruptState`.
    fn load(&self) -> Result<Snapshot>;
    /// Replaces the whole persisted state in one transaction.
    fn persist(&self, snapshot: &Snapshot) -> Result<()>;

    // Feed operations
    fn insert_feed(&self, feed: &Feed) -> Result<FeedId>;
    fn update_feed(&self, feed: &Feed) -> Result<()>;
    fn delete_feed(&self, id: FeedId) -> Result<()>;

    // Item operations
    /// Writes the feed's cursor together with a merge outcome.
    fn apply_refresh(&self, feed: &Feed, outcome: &MergeOutcome) -> Result<()>;
    /// Returns false when no such item exists.
    fn set_read(&self, key: &ItemKey, read: bool) -> Result<bool>;
    /// Sets the read flag of every listed item in one transaction.
    /// Returns the number of items found.
    fn set_read_many(&self, keys: &[ItemKey], read: bool) -> Result<usize>;
    /// Returns false when no such item exists.
    fn set_queued(&self, key: &ItemKey, queued: bool) -> Result<bool>;
    fn delete_items(&self, keys: &[ItemKey]) -> Result<usize>;
}
