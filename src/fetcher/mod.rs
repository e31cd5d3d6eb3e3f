pub mod http_fetcher;
pub mod parallel;
#[cfg(test)]
pub mod scripted;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::{Result, RssqError};
use crate::domain::{FeedId, Item};

pub use http_fetcher::HttpFetcher;
pub use parallel::ParallelFetcher;

#[derive(Debug)]
pub enum FetchResponse {
    /// New content fetched successfully
    Content {
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    /// Content not modified (HTTP 304)
    NotModified,
}

/// Transport used to retrieve feed documents.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResponse>;
}

/// Outcome of one fetch-and-parse attempt, on its way to the merge coordinator.
#[derive(Debug)]
pub struct FetchResult {
    pub feed_id: FeedId,
    pub outcome: FetchOutcome,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Success {
        items: Vec<Item>,
        etag: Option<String>,
        last_modified: Option<String>,
        /// Title announced by the document itself.
        title: Option<String>,
    },
    NotModified,
    Failure(RssqError),
}
