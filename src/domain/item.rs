use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::app::RssqError;
use crate::domain::FeedId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Identity within the owning feed; see [`Item::derive_stable_id`].
    pub stable_id: String,
    pub feed_id: FeedId,
    pub title: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub read: bool,
    /// Saved for later reading; independent of `read`.
    pub queued: bool,
    pub first_seen_at: DateTime<Utc>,
}

impl Item {
    pub fn new(feed_id: FeedId, stable_id: impl Into<String>, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            stable_id: stable_id.into(),
            feed_id,
            title: None,
            link: None,
            published_at: None,
            summary: None,
            read: false,
            queued: false,
            first_seen_at,
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.feed_id, self.stable_id.clone())
    }

    /// Identity derivation: guid, then link, then a hash of title and date.
    ///
    /// Returns `None` when the entry carries nothing to identify it by.
    pub fn derive_stable_id(
        guid: Option<&str>,
        link: Option<&str>,
        title: Option<&str>,
        published_at: Option<DateTime<Utc>>,
    ) -> Option<String> {
        fn present(s: Option<&str>) -> Option<&str> {
            s.map(str::trim).filter(|s| !s.is_empty())
        }

        if let Some(guid) = present(guid) {
            return Some(guid.to_string());
        }
        if let Some(link) = present(link) {
            return Some(link.to_string());
        }
        present(title).map(|title| Self::content_hash(title, published_at))
    }

    /// SHA-256 over title and publication date, hex encoded.
    pub fn content_hash(title: &str, published_at: Option<DateTime<Utc>>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        if let Some(published_at) = published_at {
            hasher.update(published_at.to_rfc3339().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }

    /// Timestamp used for timeline ordering.
    pub fn sort_time(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.first_seen_at)
    }

    /// Whether retention drops this item at `cutoff`.
    ///
    /// Only the publication date counts. Undated items never expire: they
    /// would come back unread on the next fetch of a feed that still lists them.
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.published_at.is_some_and(|published_at| published_at < cutoff)
    }
}

/// Globally unique item address, written as `<feed_id>:<stable_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub feed_id: FeedId,
    pub stable_id: String,
}

impl ItemKey {
    pub fn new(feed_id: FeedId, stable_id: impl Into<String>) -> Self {
        Self {
            feed_id,
            stable_id: stable_id.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.feed_id, self.stable_id)
    }
}

impl FromStr for ItemKey {
    type Err = RssqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RssqError::InvalidItemKey(s.to_string());
        let (feed_id, stable_id) = s.split_once(':').ok_or_else(invalid)?;
        let feed_id = feed_id.parse::<FeedId>().map_err(|_| invalid())?;
        if stable_id.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(feed_id, stable_id))
    }
}
