//! # rssq
//!
//! Aggregates many RSS/Atom feeds into one chronological, read/unread-aware
//! timeline that survives restarts.
//!
//! ## Architecture
//!
//! ```text
//! Registry → Scheduler → Normalizer → Merge → State ⇄ Timeline → UI
//! ```
//!
//! - [`registry`]: the subscribed feeds and their fetch cursors
//! - [`scheduler`]: picks due feeds, fetches them on a bounded pool and
//!   applies results one at a time
//! - [`normalizer`]: converts RSS/Atom/JSON feeds into candidate items
//! - [`merge`]: per-feed reconciliation that never loses read flags
//! - [`state`]: in-memory state over the SQLite [`store`]
//! - [`timeline`]: ordered, filterable view of all items
//!
//! ## Quick Start
//!
//! ```bash
//! # Add a feed
//! rssq add https://blog.rust-lang.org/feed.xml
//!
//! # Show unread items
//! rssq timeline --unread
//!
//! # Keep refreshing in the foreground
//! rssq watch
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// state, registry, scheduler, timeline.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Injectable time source.
pub mod clock;

/// Configuration loaded from `~/.config/rssq/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Feed`](domain::Feed): a subscription and its fetch cursor
/// - [`Item`](domain::Item): one entry, identified per feed by its stable id
/// - [`ItemKey`](domain::ItemKey): global item address
/// - [`StatusEvent`](domain::StatusEvent): feed health notifications
pub mod domain;

/// HTTP fetching with conditional request support.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for feed fetching
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
/// - [`ParallelFetcher`](fetcher::parallel::ParallelFetcher): Concurrent fetching with semaphore
pub mod fetcher;

/// Dedup/merge of parsed items into known ones.
pub mod merge;

/// Feed parsing and normalization.
///
/// Converts RSS 0.9x/1.0/2.0, Atom 0.3/1.0, and JSON Feed 1.0
/// into unified [`Item`](domain::Item) structs.
pub mod normalizer;

/// Feed subscriptions.
pub mod registry;

/// Refresh scheduling, worker pool coordination and the background service.
pub mod scheduler;

/// Serialized in-memory state with durable writes.
pub mod state;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;

/// Cross-feed timeline projection.
pub mod timeline;
