use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type FeedId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub url: String,
    pub title: Option<String>,
    /// Configuration order; lower sorts first.
    pub position: i64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Time of the most recent fetch attempt, successful or not.
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub enabled: bool,
    /// Set when the feed was removed but its items were retained.
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Group the feed is filed under, if any.
    pub group: Option<String>,
}

impl Feed {
    pub fn new(url: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            url,
            title: None,
            position: 0,
            etag: None,
            last_modified: None,
            last_fetched_at: None,
            consecutive_failures: 0,
            last_error: None,
            enabled: true,
            archived_at: None,
            created_at,
            group: None,
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Whether the scheduler may fetch this feed at all.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && !self.is_archived()
    }

    pub fn is_degraded(&self, threshold: u32) -> bool {
        threshold > 0 && self.consecutive_failures >= threshold
    }

    /// Interval until the next attempt, doubled for every consecutive failure.
    pub fn retry_interval(&self, policy: &RefreshPolicy) -> Duration {
        if self.consecutive_failures == 0 {
            return policy.refresh_interval;
        }

        let factor = 1u32
            .checked_shl(self.consecutive_failures.min(31))
            .unwrap_or(u32::MAX);
        let ceiling = policy.max_backoff.max(policy.refresh_interval);

        policy.refresh_interval.saturating_mul(factor).min(ceiling)
    }

    /// `None` means the feed was never fetched and is due right away.
    pub fn next_due_at(&self, policy: &RefreshPolicy) -> Option<DateTime<Utc>> {
        let last = self.last_fetched_at?;
        let interval = chrono::Duration::from_std(self.retry_interval(policy))
            .unwrap_or(chrono::Duration::MAX);
        Some(last.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub fn is_due(&self, now: DateTime<Utc>, policy: &RefreshPolicy) -> bool {
        match self.next_due_at(policy) {
            Some(due) => now >= due,
            None => true,
        }
    }

    /// Applies the result of one fetch attempt to the cursor fields.
    pub fn apply_cursor(&mut self, update: &CursorUpdate) {
        self.last_fetched_at = Some(update.fetched_at);

        match &update.outcome {
            CursorOutcome::Success => {
                self.etag = update.etag.clone();
                self.last_modified = update.last_modified.clone();
                self.consecutive_failures = 0;
                self.last_error = None;
            }
            CursorOutcome::NotModified => {
                self.consecutive_failures = 0;
                self.last_error = None;
            }
            CursorOutcome::Failure(message) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_error = Some(message.clone());
            }
        }
    }
}

/// How often feeds are refreshed and how far failures push them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub refresh_interval: Duration,
    pub max_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorOutcome {
    Success,
    NotModified,
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorUpdate {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub outcome: CursorOutcome,
}

impl CursorUpdate {
    pub fn success(
        etag: Option<String>,
        last_modified: Option<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            etag,
            last_modified,
            fetched_at,
            outcome: CursorOutcome::Success,
        }
    }

    pub fn not_modified(fetched_at: DateTime<Utc>) -> Self {
        Self {
            etag: None,
            last_modified: None,
            fetched_at,
            outcome: CursorOutcome::NotModified,
        }
    }

    pub fn failure(message: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            etag: None,
            last_modified: None,
            fetched_at,
            outcome: CursorOutcome::Failure(message.into()),
        }
    }
}

/// Health of a feed as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedStatus {
    pub feed_id: FeedId,
    pub title: String,
    pub url: String,
    pub enabled: bool,
    pub degraded: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub group: Option<String>,
    pub unread: usize,
}

/// A named set of feeds with their combined unread count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedGroup {
    pub name: String,
    pub feeds: Vec<FeedId>,
    pub unread: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> RefreshPolicy {
        RefreshPolicy {
            refresh_interval: Duration::from_secs(600),
            max_backoff: Duration::from_secs(3600),
        }
    }

    fn fetched_feed(at: DateTime<Utc>) -> Feed {
        let mut feed = Feed::new("https://example.com/feed.xml".into(), at);
        feed.last_fetched_at = Some(at);
        feed
    }

    #[test]
    fn test_never_fetched_feed_is_due() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let feed = Feed::new("https://example.com/feed.xml".into(), now);
        assert!(feed.next_due_at(&policy()).is_none());
        assert!(feed.is_due(now, &policy()));
    }

    #[test]
    fn test_due_after_refresh_interval() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let feed = fetched_feed(t0);

        assert!(!feed.is_due(t0 + chrono::Duration::seconds(599), &policy()));
        assert!(feed.is_due(t0 + chrono::Duration::seconds(600), &policy()));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut feed = fetched_feed(t0);

        feed.consecutive_failures = 1;
        assert_eq!(feed.retry_interval(&policy()), Duration::from_secs(1200));
        feed.consecutive_failures = 2;
        assert_eq!(feed.retry_interval(&policy()), Duration::from_secs(2400));
        feed.consecutive_failures = 3;
        assert_eq!(feed.retry_interval(&policy()), Duration::from_secs(3600));
        feed.consecutive_failures = 500;
        assert_eq!(feed.retry_interval(&policy()), Duration::from_secs(3600));
    }

    #[test]
    fn test_backoff_never_shorter_than_refresh_interval() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut feed = fetched_feed(t0);
        feed.consecutive_failures = 4;

        let policy = RefreshPolicy {
            refresh_interval: Duration::from_secs(7200),
            max_backoff: Duration::from_secs(60),
        };
        assert_eq!(feed.retry_interval(&policy), Duration::from_secs(7200));
    }

    #[test]
    fn test_cursor_failure_then_success_resets_count() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut feed = fetched_feed(t0);
        feed.etag = Some("\"v1\"".into());

        feed.apply_cursor(&CursorUpdate::failure("timed out", t0));
        feed.apply_cursor(&CursorUpdate::failure("timed out", t0));
        assert_eq!(feed.consecutive_failures, 2);
        assert_eq!(feed.last_error.as_deref(), Some("timed out"));
        assert_eq!(feed.etag.as_deref(), Some("\"v1\""));
        assert!(feed.is_degraded(2));

        feed.apply_cursor(&CursorUpdate::success(Some("\"v2\"".into()), None, t0));
        assert_eq!(feed.consecutive_failures, 0);
        assert!(feed.last_error.is_none());
        assert_eq!(feed.etag.as_deref(), Some("\"v2\""));
    }

    #[test]
    fn test_not_modified_keeps_validators() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let mut feed = fetched_feed(t0);
        feed.etag = Some("\"v1\"".into());
        feed.last_modified = Some("Mon, 01 Jan 2024 00:00:00 GMT".into());

        feed.apply_cursor(&CursorUpdate::not_modified(t1));

        assert_eq!(feed.last_fetched_at, Some(t1));
        assert_eq!(feed.etag.as_deref(), Some("\"v1\""));
        assert_eq!(
            feed.last_modified.as_deref(),
            Some("Mon, 01 Jan 2024 00:00:00 GMT")
        );
    }

    #[test]
    fn test_zero_threshold_never_degrades() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut feed = fetched_feed(t0);
        feed.consecutive_failures = 10;
        assert!(!feed.is_degraded(0));
    }
}
