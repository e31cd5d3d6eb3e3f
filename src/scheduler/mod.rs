//! Decides which feeds to fetch, fans the work out to a bounded pool and
//! applies the results one at a time.

pub mod service;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};

use crate::app::{Result, RssqError};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::domain::{CursorUpdate, Feed, FeedId, StatusEvent};
use crate::fetcher::parallel::{FetchJob, ParallelFetcher};
use crate::fetcher::{FetchOutcome, FetchResult, Fetcher};
use crate::merge::MergeOptions;
use crate::state::StateStore;

const EVENT_CAPACITY: usize = 256;

/// Which feeds a forced refresh covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTarget {
    All,
    Feed(FeedId),
}

/// What happened during one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub refreshed: Vec<FeedId>,
    pub not_modified: Vec<FeedId>,
    pub failed: Vec<FeedId>,
    /// Feeds skipped because a fetch for them was already running.
    pub deferred: Vec<FeedId>,
    pub new_items: usize,
    pub updated_items: usize,
    pub pruned: usize,
    pub cancelled: bool,
}

impl PassReport {
    pub fn attempted(&self) -> usize {
        self.refreshed.len() + self.not_modified.len() + self.failed.len()
    }
}

/// Feed ids claimed by a running pass; released on drop.
struct Claims {
    in_flight: Arc<Mutex<HashSet<FeedId>>>,
    ids: Vec<FeedId>,
}

impl Drop for Claims {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        for id in &self.ids {
            in_flight.remove(id);
        }
    }
}

pub struct Scheduler {
    state: Arc<StateStore>,
    pool: ParallelFetcher,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    in_flight: Arc<Mutex<HashSet<FeedId>>>,
    events: broadcast::Sender<StatusEvent>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        state: Arc<StateStore>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let pool = ParallelFetcher::with_workers(
            fetcher,
            Arc::clone(&clock),
            config.concurrency,
            config.fetch_timeout,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Self {
            state,
            pool,
            clock,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            events,
            shutdown,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Cancels in-flight fetches; no result is applied afterwards.
    pub fn shutdown(&self) {
        tracing::info!("Scheduler shutting down");
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Fetches every enabled feed that is due at `now`.
    pub async fn run(&self, now: DateTime<Utc>) -> PassReport {
        let policy = self.config.refresh_policy();
        let due: Vec<Feed> = self
            .state
            .feeds()
            .into_iter()
            .filter(|f| f.is_schedulable() && f.is_due(now, &policy))
            .collect();

        tracing::debug!("{} feeds due at {}", due.len(), now);
        self.run_pass(due, now).await
    }

    /// Fetches the targeted feeds regardless of their due time.
    pub async fn force_refresh(&self, target: RefreshTarget) -> Result<PassReport> {
        let feeds: Vec<Feed> = match target {
            RefreshTarget::All => self
                .state
                .feeds()
                .into_iter()
                .filter(Feed::is_schedulable)
                .collect(),
            RefreshTarget::Feed(id) => {
                let feed = self
                    .state
                    .feed(id)
                    .filter(|f| !f.is_archived())
                    .ok_or_else(|| RssqError::FeedNotFound(id.to_string()))?;
                if feed.enabled {
                    vec![feed]
                } else {
                    tracing::debug!("Feed {} is disabled, not refreshing", id);
                    Vec::new()
                }
            }
        };

        Ok(self.run_pass(feeds, self.clock.now()).await)
    }

    async fn run_pass(&self, feeds: Vec<Feed>, now: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();
        if self.is_shut_down() {
            report.cancelled = true;
            return report;
        }

        let (jobs, claims) = self.claim(feeds, &mut report);
        let options = MergeOptions {
            retention_cutoff: self.retention_cutoff(now),
        };

        if !jobs.is_empty() {
            let (tx, mut rx) = mpsc::channel(jobs.len());
            let shutdown = self.shutdown.subscribe();
            let handles = self.pool.dispatch(jobs, tx, shutdown.clone());

            while let Some(result) = rx.recv().await {
                if *shutdown.borrow() {
                    report.cancelled = true;
                    break;
                }
                self.apply(result, options, &mut report);
            }
            drop(rx);

            for joined in futures::future::join_all(handles).await {
                if let Err(e) = joined {
                    tracing::error!("Fetch task failed: {}", e);
                }
            }
            if *shutdown.borrow() {
                report.cancelled = true;
            }
        }
        drop(claims);

        if !report.cancelled {
            if let Some(cutoff) = options.retention_cutoff {
                match self.state.prune(cutoff) {
                    Ok(pruned) => report.pruned = pruned,
                    Err(e) => tracing::warn!("Pruning failed: {}", e),
                }
            }
        }

        tracing::info!(
            "Refresh pass done: {} refreshed, {} not modified, {} failed, {} deferred, {} new items{}",
            report.refreshed.len(),
            report.not_modified.len(),
            report.failed.len(),
            report.deferred.len(),
            report.new_items,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }

    /// Takes ownership of the feeds for this pass; feeds already being
    /// fetched elsewhere are deferred.
    fn claim(&self, feeds: Vec<Feed>, report: &mut PassReport) -> (Vec<FetchJob>, Claims) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let mut jobs = Vec::new();
        let mut ids = Vec::new();

        for feed in &feeds {
            if in_flight.insert(feed.id) {
                ids.push(feed.id);
                jobs.push(FetchJob::from(feed));
            } else {
                tracing::debug!("Deferring: {}", RssqError::ConcurrencyLimitExceeded(feed.id));
                report.deferred.push(feed.id);
            }
        }

        let claims = Claims {
            in_flight: Arc::clone(&self.in_flight),
            ids,
        };
        (jobs, claims)
    }

    fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let retention = chrono::Duration::from_std(self.config.retention?).ok()?;
        now.checked_sub_signed(retention)
    }

    fn apply(&self, result: FetchResult, options: MergeOptions, report: &mut PassReport) {
        let FetchResult {
            feed_id,
            outcome,
            fetched_at,
        } = result;

        // The state store re-checks under its write lock; this only saves the work.
        let previous = match self.state.feed(feed_id) {
            Some(feed) if !feed.is_archived() => feed,
            _ => return went_away(feed_id),
        };

        match outcome {
            FetchOutcome::Success {
                items,
                etag,
                last_modified,
                title,
            } => {
                let update = CursorUpdate::success(etag, last_modified, fetched_at);
                match self
                    .state
                    .apply_refresh(feed_id, &update, items, title, options)
                {
                    Ok((feed, merged)) => {
                        tracing::debug!(
                            "Feed {}: {} new, {} updated",
                            feed.url,
                            merged.new_items.len(),
                            merged.updated_items.len()
                        );
                        report.refreshed.push(feed_id);
                        report.new_items += merged.new_items.len();
                        report.updated_items += merged.updated_items.len();
                        self.emit(StatusEvent::FeedRefreshed {
                            feed_id,
                            new_items: merged.new_items.len(),
                            updated_items: merged.updated_items.len(),
                            not_modified: false,
                        });
                    }
                    Err(RssqError::FeedNotFound(_)) => went_away(feed_id),
                    Err(e) => {
                        tracing::warn!("Could not store refresh of feed {}: {}", feed_id, e);
                        report.failed.push(feed_id);
                    }
                }
            }
            FetchOutcome::NotModified => {
                match self
                    .state
                    .record_cursor(feed_id, &CursorUpdate::not_modified(fetched_at))
                {
                    Ok(_) => {
                        report.not_modified.push(feed_id);
                        self.emit(StatusEvent::FeedRefreshed {
                            feed_id,
                            new_items: 0,
                            updated_items: 0,
                            not_modified: true,
                        });
                    }
                    Err(RssqError::FeedNotFound(_)) => went_away(feed_id),
                    Err(e) => {
                        tracing::warn!("Could not store cursor of feed {}: {}", feed_id, e);
                        report.failed.push(feed_id);
                    }
                }
            }
            FetchOutcome::Failure(error) => {
                let message = error.to_string();
                tracing::warn!("Feed {} failed: {}", previous.url, message);

                let feed = match self
                    .state
                    .record_cursor(feed_id, &CursorUpdate::failure(message.clone(), fetched_at))
                {
                    Ok(feed) => feed,
                    Err(RssqError::FeedNotFound(_)) => return went_away(feed_id),
                    Err(e) => {
                        report.failed.push(feed_id);
                        tracing::warn!("Could not store failure of feed {}: {}", feed_id, e);
                        return;
                    }
                };

                report.failed.push(feed_id);
                self.emit(StatusEvent::FeedFailed {
                    feed_id,
                    error: message,
                    consecutive_failures: feed.consecutive_failures,
                });

                let threshold = self.config.degraded_after;
                if feed.is_degraded(threshold) && !previous.is_degraded(threshold) {
                    tracing::warn!(
                        "Feed {} is degraded after {} consecutive failures",
                        feed.url,
                        feed.consecutive_failures
                    );
                    self.emit(StatusEvent::FeedDegraded {
                        feed_id,
                        consecutive_failures: feed.consecutive_failures,
                    });
                }
            }
        }
    }

    fn emit(&self, event: StatusEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn went_away(feed_id: FeedId) {
    tracing::debug!("Feed {} went away during the pass, dropping result", feed_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;

    use crate::clock::ManualClock;
    use crate::domain::{ItemKey, Page, TimelineFilter};
    use crate::fetcher::scripted::{Scripted, ScriptedFetcher};
    use crate::state::RemovalPolicy;
    use crate::store::SqliteStore;
    use crate::timeline::Timeline;

    const FEED_A: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Feed A</title>
<item><guid>a1</guid><title>A one</title><pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate></item>
<item><guid>a2</guid><title>A two</title><pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
</channel></rss>"#;

    const FEED_B: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Feed B</title>
  <entry><id>b1</id><title>B one</title><updated>2024-01-03T00:00:00Z</updated></entry>
</feed>"#;

    struct Harness {
        state: Arc<StateStore>,
        fetcher: Arc<ScriptedFetcher>,
        clock: Arc<ManualClock>,
        scheduler: Arc<Scheduler>,
    }

    impl Harness {
        fn new(config: SyncConfig) -> Self {
            Self::with_fetcher(config, ScriptedFetcher::new())
        }

        fn with_fetcher(config: SyncConfig, fetcher: ScriptedFetcher) -> Self {
            let store = Arc::new(SqliteStore::in_memory().unwrap());
            let state = Arc::new(StateStore::load(store).unwrap());
            let fetcher = Arc::new(fetcher);
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
            ));
            let scheduler = Arc::new(Scheduler::new(
                state.clone(),
                fetcher.clone(),
                clock.clone(),
                config,
            ));
            Self {
                state,
                fetcher,
                clock,
                scheduler,
            }
        }

        fn add(&self, url: &str, response: Scripted) -> FeedId {
            self.fetcher.script(url, response);
            self.state.add_feed(url, self.clock.now()).unwrap()
        }

        async fn run(&self) -> PassReport {
            self.scheduler.run(self.clock.now()).await
        }

        fn timeline_ids(&self, filter: TimelineFilter) -> Vec<String> {
            Timeline::new(self.state.clone())
                .view(filter, Page::all())
                .into_iter()
                .map(|e| e.key.stable_id)
                .collect()
        }
    }

    fn config() -> SyncConfig {
        SyncConfig {
            refresh_interval: Duration::from_secs(600),
            max_backoff: Duration::from_secs(3600),
            fetch_timeout: Duration::from_millis(200),
            concurrency: 4,
            degraded_after: 3,
            ..SyncConfig::default()
        }
    }

    fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_end_to_end_timeline_and_read_state() {
        let h = Harness::new(config());
        let a = h.add("https://a.example/rss", Scripted::body(FEED_A));
        h.add("https://b.example/atom", Scripted::body(FEED_B));

        let report = h.run().await;
        assert_eq!(report.refreshed.len(), 2);
        assert_eq!(report.new_items, 3);
        assert_eq!(h.timeline_ids(TimelineFilter::default()), vec!["b1", "a1", "a2"]);

        h.state.mark_read(&ItemKey::new(a, "a1"), true).unwrap();
        h.scheduler
            .force_refresh(RefreshTarget::Feed(a))
            .await
            .unwrap();

        h.state.read(|library| {
            assert!(library.item(&ItemKey::new(a, "a1")).unwrap().read);
            assert!(!library.item(&ItemKey::new(a, "a2")).unwrap().read);
            assert_eq!(library.items_for(a).len(), 2);
        });
        assert_eq!(h.timeline_ids(TimelineFilter::unread()), vec!["b1", "a2"]);
        assert_eq!(h.state.feed(a).unwrap().title.as_deref(), Some("Feed A"));
    }

    #[tokio::test]
    async fn test_failing_feed_does_not_block_others() {
        let h = Harness::new(config());
        let slow = h.add("https://slow.example/rss", Scripted::Hang);
        let b = h.add("https://b.example/atom", Scripted::body(FEED_B));

        let report = h.run().await;

        assert_eq!(report.failed, vec![slow]);
        assert_eq!(report.refreshed, vec![b]);
        assert_eq!(h.timeline_ids(TimelineFilter::default()), vec!["b1"]);

        let slow_feed = h.state.feed(slow).unwrap();
        assert_eq!(slow_feed.consecutive_failures, 1);
        assert!(slow_feed.last_error.is_some());
        assert_eq!(h.state.feed(b).unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_conditional_fetch_skips_merge() {
        let h = Harness::new(config());
        let a = h.add("https://a.example/rss", Scripted::body_with_etag(FEED_A, "\"v1\""));
        h.fetcher.script("https://a.example/rss", Scripted::NotModified);
        let mut events = h.scheduler.subscribe();

        h.run().await;
        let before: Vec<_> = h.state.read(|l| l.items_for(a).to_vec());

        h.clock.advance(chrono::Duration::minutes(10));
        let report = h.run().await;
        assert_eq!(report.not_modified, vec![a]);

        let requests = h.fetcher.requests_for("https://a.example/rss");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].etag, None);
        assert_eq!(requests[1].etag.as_deref(), Some("\"v1\""));

        let after: Vec<_> = h.state.read(|l| l.items_for(a).to_vec());
        assert_eq!(before, after);

        let feed = h.state.feed(a).unwrap();
        assert_eq!(feed.etag.as_deref(), Some("\"v1\""));
        assert_eq!(feed.last_fetched_at, Some(h.clock.now()));

        let events = drain(&mut events);
        assert_eq!(
            events.last(),
            Some(&StatusEvent::FeedRefreshed {
                feed_id: a,
                new_items: 0,
                updated_items: 0,
                not_modified: true,
            })
        );
    }

    #[tokio::test]
    async fn test_run_respects_due_time_and_backoff() {
        let h = Harness::new(config());
        let a = h.add("https://a.example/rss", Scripted::Fail("connection reset".into()));

        assert_eq!(h.run().await.failed, vec![a]);

        // One failure doubles the 10 minute interval.
        h.clock.advance(chrono::Duration::minutes(10));
        assert_eq!(h.run().await.attempted(), 0);

        h.clock.advance(chrono::Duration::minutes(10));
        assert_eq!(h.run().await.failed, vec![a]);
        assert_eq!(h.state.feed(a).unwrap().consecutive_failures, 2);

        h.fetcher.replace("https://a.example/rss", Scripted::body(FEED_A));
        h.clock.advance(chrono::Duration::minutes(40));
        assert_eq!(h.run().await.refreshed, vec![a]);
        assert_eq!(h.state.feed(a).unwrap().consecutive_failures, 0);

        h.clock.advance(chrono::Duration::minutes(5));
        assert_eq!(h.run().await.attempted(), 0);
    }

    #[tokio::test]
    async fn test_degraded_event_fires_once_at_threshold() {
        let h = Harness::new(config());
        let a = h.add("https://a.example/rss", Scripted::Fail("502 Bad Gateway".into()));
        let mut events = h.scheduler.subscribe();

        for _ in 0..4 {
            h.scheduler.force_refresh(RefreshTarget::All).await.unwrap();
        }

        let events = drain(&mut events);
        let failed = events
            .iter()
            .filter(|e| matches!(e, StatusEvent::FeedFailed { .. }))
            .count();
        let degraded: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, StatusEvent::FeedDegraded { .. }))
            .collect();

        assert_eq!(failed, 4);
        assert_eq!(
            degraded,
            vec![&StatusEvent::FeedDegraded {
                feed_id: a,
                consecutive_failures: 3,
            }]
        );

        let feed = h.state.feed(a).unwrap();
        assert!(feed.enabled);
        assert!(feed.is_degraded(3));
    }

    #[tokio::test]
    async fn test_parse_failure_counts_as_feed_failure() {
        let h = Harness::new(config());
        let a = h.add("https://a.example/", Scripted::body("<html><body>moved</body></html>"));

        let report = h.run().await;
        assert_eq!(report.failed, vec![a]);
        let feed = h.state.feed(a).unwrap();
        assert_eq!(feed.consecutive_failures, 1);
        assert!(feed.last_error.unwrap().contains("Unsupported"));
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let config = SyncConfig {
            concurrency: 2,
            fetch_timeout: Duration::from_secs(5),
            ..config()
        };
        let h = Harness::with_fetcher(config, ScriptedFetcher::with_delay(Duration::from_millis(25)));
        for i in 0..8 {
            h.add(&format!("https://feed{}.example/rss", i), Scripted::body(FEED_B));
        }

        let report = h.run().await;
        assert_eq!(report.refreshed.len(), 8);
        assert!(h.fetcher.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pass_without_applying() {
        let config = SyncConfig {
            fetch_timeout: Duration::from_secs(60),
            ..config()
        };
        let h = Harness::new(config);
        let a = h.add("https://hang.example/rss", Scripted::Hang);

        let scheduler = h.scheduler.clone();
        let now = h.clock.now();
        let pass = tokio::spawn(async move { scheduler.run(now).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        h.scheduler.shutdown();

        let report = tokio::time::timeout(Duration::from_secs(2), pass)
            .await
            .expect("pass should stop promptly")
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.attempted(), 0);
        let feed = h.state.feed(a).unwrap();
        assert_eq!(feed.last_fetched_at, None);
        assert_eq!(feed.consecutive_failures, 0);

        let after = h.scheduler.force_refresh(RefreshTarget::All).await.unwrap();
        assert!(after.cancelled);
    }

    #[tokio::test]
    async fn test_feed_in_flight_is_deferred() {
        let config = SyncConfig {
            fetch_timeout: Duration::from_secs(60),
            ..config()
        };
        let h = Harness::new(config);
        let a = h.add("https://hang.example/rss", Scripted::Hang);

        let scheduler = h.scheduler.clone();
        let first = tokio::spawn(async move { scheduler.force_refresh(RefreshTarget::Feed(a)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = h.scheduler.force_refresh(RefreshTarget::Feed(a)).await.unwrap();
        assert_eq!(second.deferred, vec![a]);
        assert_eq!(second.attempted(), 0);

        h.scheduler.shutdown();
        let first = first.await.unwrap().unwrap();
        assert!(first.cancelled);
    }

    #[tokio::test]
    async fn test_force_refresh_targets() {
        let h = Harness::new(config());
        let a = h.add("https://a.example/rss", Scripted::body(FEED_A));
        let b = h.add("https://b.example/atom", Scripted::body(FEED_B));
        h.state.update_feed(b, |f| f.enabled = false).unwrap();

        assert!(matches!(
            h.scheduler.force_refresh(RefreshTarget::Feed(999)).await,
            Err(RssqError::FeedNotFound(_))
        ));

        let disabled = h.scheduler.force_refresh(RefreshTarget::Feed(b)).await.unwrap();
        assert_eq!(disabled.attempted(), 0);

        h.run().await;
        // Not due any more, but forced.
        let forced = h.scheduler.force_refresh(RefreshTarget::All).await.unwrap();
        assert_eq!(forced.refreshed, vec![a]);
    }

    #[tokio::test]
    async fn test_retention_prunes_after_pass() {
        let config = SyncConfig {
            retention: Some(Duration::from_secs(5 * 86400)),
            ..config()
        };
        let h = Harness::new(config);
        h.add("https://a.example/rss", Scripted::body(FEED_A));
        h.add("https://b.example/atom", Scripted::body(FEED_B));

        // Cutoff Jan 3 12:00 rules out every item.
        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap());
        let report = h.run().await;

        assert_eq!(report.new_items, 0);
        assert!(h.timeline_ids(TimelineFilter::default()).is_empty());

        // Cutoff Jan 1 12:00 keeps a2 out.
        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap());
        h.scheduler.force_refresh(RefreshTarget::All).await.unwrap();
        assert_eq!(h.timeline_ids(TimelineFilter::default()), vec!["b1", "a1"]);
    }

    #[tokio::test]
    async fn test_undated_item_stays_read_under_retention() {
        let config = SyncConfig {
            retention: Some(Duration::from_secs(5 * 86400)),
            ..config()
        };
        let h = Harness::new(config);
        let a = h.add(
            "https://undated.example/rss",
            Scripted::body(
                r#"<rss version="2.0"><channel><title>Undated</title>
<item><guid>u1</guid><title>Undated</title></item></channel></rss>"#,
            ),
        );
        let key = ItemKey::new(a, "u1");

        h.run().await;
        h.state.mark_read(&key, true).unwrap();

        // Well past first_seen_at + retention.
        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap());
        assert_eq!(h.run().await.pruned, 0);

        h.clock.advance(chrono::Duration::minutes(11));
        let report = h.run().await;
        assert_eq!(report.refreshed, vec![a]);
        assert_eq!(report.new_items, 0);

        let item = h.state.read(|l| l.item(&key).cloned()).unwrap();
        assert!(item.read);
        assert_eq!(
            item.first_seen_at,
            Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_feed_archived_mid_fetch_is_left_alone() {
        let config = SyncConfig {
            fetch_timeout: Duration::from_secs(5),
            ..config()
        };
        let h = Harness::with_fetcher(config, ScriptedFetcher::with_delay(Duration::from_millis(150)));
        let a = h.add("https://a.example/rss", Scripted::body_with_etag(FEED_A, "\"v1\""));

        let scheduler = h.scheduler.clone();
        let now = h.clock.now();
        let pass = tokio::spawn(async move { scheduler.run(now).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        h.state
            .remove_feed(a, RemovalPolicy::Retain, h.clock.now())
            .unwrap();

        let report = pass.await.unwrap();
        assert_eq!(report.attempted(), 0);

        let feed = h.state.feed(a).unwrap();
        assert!(feed.is_archived());
        assert_eq!(feed.etag, None);
        assert_eq!(feed.last_fetched_at, None);
        assert!(h.state.read(|l| l.items_for(a).is_empty()));
    }
}
