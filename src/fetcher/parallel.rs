use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;

use crate::app::RssqError;
use crate::clock::Clock;
use crate::domain::{Feed, FeedId};
use crate::fetcher::{FetchOutcome, FetchResponse, FetchResult, Fetcher};
use crate::normalizer::Normalizer;

/// Everything a worker needs to fetch one feed, detached from the live state.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub feed_id: FeedId,
    pub url: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl From<&Feed> for FetchJob {
    fn from(feed: &Feed) -> Self {
        Self {
            feed_id: feed.id,
            url: feed.url.clone(),
            etag: feed.etag.clone(),
            last_modified: feed.last_modified.clone(),
        }
    }
}

/// Bounded pool of fetch-and-parse workers.
#[derive(Clone)]
pub struct ParallelFetcher {
    fetcher: Arc<dyn Fetcher>,
    normalizer: Normalizer,
    clock: Arc<dyn Clock>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

impl ParallelFetcher {
    pub fn with_workers(
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        workers: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            normalizer: Normalizer::new(),
            clock,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    /// Spawns one task per job. Each result is sent on `results`.
    ///
    /// Tasks stop without sending anything once `shutdown` turns true.
    pub fn dispatch(
        &self,
        jobs: Vec<FetchJob>,
        results: mpsc::Sender<FetchResult>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        jobs.into_iter()
            .map(|job| {
                let pool = self.clone();
                let results = results.clone();
                let mut shutdown = shutdown.clone();

                tokio::spawn(async move {
                    let permit = tokio::select! {
                        permit = pool.semaphore.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return,
                        },
                        _ = cancelled(&mut shutdown) => return,
                    };

                    let outcome = tokio::select! {
                        outcome = pool.fetch_one(&job) => outcome,
                        _ = cancelled(&mut shutdown) => {
                            tracing::debug!("Fetch of {} cancelled", job.url);
                            return;
                        }
                    };
                    drop(permit);

                    let result = FetchResult {
                        feed_id: job.feed_id,
                        outcome,
                        fetched_at: pool.clock.now(),
                    };
                    if results.send(result).await.is_err() {
                        tracing::debug!("Result for {} dropped, coordinator gone", job.url);
                    }
                })
            })
            .collect()
    }

    async fn fetch_one(&self, job: &FetchJob) -> FetchOutcome {
        let request = self
            .fetcher
            .fetch(&job.url, job.etag.as_deref(), job.last_modified.as_deref());

        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return FetchOutcome::Failure(e),
            Err(_) => {
                return FetchOutcome::Failure(RssqError::Transport(format!(
                    "timed out after {:?}",
                    self.timeout
                )))
            }
        };

        match response {
            FetchResponse::NotModified => {
                tracing::debug!("Feed {} not modified", job.url);
                FetchOutcome::NotModified
            }
            FetchResponse::Content {
                body,
                etag,
                last_modified,
            } => match self.normalizer.parse_with_meta(&body, job.feed_id) {
                Ok((meta, items)) => FetchOutcome::Success {
                    items,
                    etag,
                    last_modified,
                    title: meta.title,
                },
                Err(e) => FetchOutcome::Failure(e),
            },
        }
    }
}

/// Resolves once the shutdown flag is raised. A dropped sender never cancels.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
