use std::sync::Arc;

use chrono::{DateTime, Utc};
use url::Url;

use crate::app::{Result, RssqError};
use crate::clock::Clock;
use crate::domain::{CursorOutcome, CursorUpdate, Feed, FeedGroup, FeedId, FeedStatus};
use crate::state::{RemovalPolicy, StateStore};

/// The set of subscribed feeds.
pub struct Registry {
    state: Arc<StateStore>,
    clock: Arc<dyn Clock>,
    on_remove: RemovalPolicy,
}

impl Registry {
    pub fn new(state: Arc<StateStore>, clock: Arc<dyn Clock>, on_remove: RemovalPolicy) -> Self {
        Self {
            state,
            clock,
            on_remove,
        }
    }

    /// Subscribes to `url`. Adding an already known URL returns its id.
    pub fn add(&self, url: &str) -> Result<FeedId> {
        let url = validate_url(url)?;
        let id = self.state.add_feed(&url, self.clock.now())?;
        tracing::info!("Registered feed {} ({})", id, url);
        Ok(id)
    }

    /// Active feeds in configuration order.
    pub fn list(&self) -> Vec<Feed> {
        self.state.read(|library| {
            library
                .feeds()
                .iter()
                .filter(|f| !f.is_archived())
                .cloned()
                .collect()
        })
    }

    pub fn get(&self, id: FeedId) -> Result<Feed> {
        self.state
            .feed(id)
            .filter(|f| !f.is_archived())
            .ok_or_else(|| RssqError::FeedNotFound(id.to_string()))
    }

    pub fn remove(&self, id: FeedId) -> Result<()> {
        let feed = self.state.remove_feed(id, self.on_remove, self.clock.now())?;
        tracing::info!(
            "Removed feed {} ({}), items {}",
            id,
            feed.url,
            match self.on_remove {
                RemovalPolicy::Purge => "purged",
                RemovalPolicy::Retain => "retained",
            }
        );
        Ok(())
    }

    /// Records the outcome of a fetch attempt on the feed's cursor.
    pub fn update_cursor(
        &self,
        id: FeedId,
        etag: Option<String>,
        last_modified: Option<String>,
        fetched_at: DateTime<Utc>,
        outcome: CursorOutcome,
    ) -> Result<Feed> {
        let update = CursorUpdate {
            etag,
            last_modified,
            fetched_at,
            outcome,
        };
        self.state.record_cursor(id, &update)
    }

    pub fn set_enabled(&self, id: FeedId, enabled: bool) -> Result<Feed> {
        self.state.update_feed(id, |feed| feed.enabled = enabled)
    }

    pub fn rename(&self, id: FeedId, title: Option<String>) -> Result<Feed> {
        self.state.update_feed(id, |feed| feed.title = title)
    }

    /// Files the feed under `group`; a blank name ungroups it.
    pub fn set_group(&self, id: FeedId, group: Option<&str>) -> Result<Feed> {
        let group = group
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        self.state.update_feed(id, |feed| feed.group = group)
    }

    /// Groups of active feeds with their unread counts.
    pub fn groups(&self) -> Vec<FeedGroup> {
        self.state.groups()
    }

    /// Registers the feeds listed in configuration, in order.
    ///
    /// Invalid URLs are logged and skipped so one typo does not block startup.
    pub fn sync_configured(&self, urls: &[String]) -> Vec<FeedId> {
        urls.iter()
            .filter_map(|url| match self.add(url) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!("Skipping configured feed {}: {}", url, e);
                    None
                }
            })
            .collect()
    }

    /// Health of each active feed, marking those at or past `degraded_after` failures.
    pub fn statuses(&self, degraded_after: u32) -> Vec<FeedStatus> {
        self.state.read(|library| {
            library
                .feeds()
                .iter()
                .filter(|f| !f.is_archived())
                .map(|feed| FeedStatus {
                    feed_id: feed.id,
                    title: feed.display_title().to_string(),
                    url: feed.url.clone(),
                    enabled: feed.enabled,
                    group: feed.group.clone(),
                    degraded: feed.is_degraded(degraded_after),
                    consecutive_failures: feed.consecutive_failures,
                    last_error: feed.last_error.clone(),
                    last_fetched_at: feed.last_fetched_at,
                    unread: library.unread_count(Some(feed.id)),
                })
                .collect()
        })
    }
}

/// Accepts absolute http(s) URLs with a host and returns their normalized form.
pub fn validate_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| RssqError::InvalidFeedUrl(format!("{}: {}", trimmed, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(RssqError::InvalidFeedUrl(format!(
            "{}: unsupported scheme {}",
            trimmed,
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(RssqError::InvalidFeedUrl(format!("{}: missing host", trimmed)));
    }

    Ok(url.to_string())
}
