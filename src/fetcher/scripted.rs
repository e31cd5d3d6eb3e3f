//! Deterministic in-process fetcher for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::{Result, RssqError};
use crate::fetcher::{FetchResponse, Fetcher};

#[derive(Debug, Clone)]
pub enum Scripted {
    Content {
        body: String,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    NotModified,
    Fail(String),
    /// Never answers.
    Hang,
}

impl Scripted {
    pub fn body(body: impl Into<String>) -> Self {
        Scripted::Content {
            body: body.into(),
            etag: None,
            last_modified: None,
        }
    }

    pub fn body_with_etag(body: impl Into<String>, etag: impl Into<String>) -> Self {
        Scripted::Content {
            body: body.into(),
            etag: Some(etag.into()),
            last_modified: None,
        }
    }
}

/// One observed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Default)]
pub struct ScriptedFetcher {
    /// Per URL; the last queued response repeats.
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<Request>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every response back by `delay` so overlapping fetches are observable.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn script(&self, url: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Drops whatever was queued for `url` and answers with `response` from now on.
    pub fn replace(&self, url: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), VecDeque::from([response]));
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, url: &str) -> Vec<Request> {
        self.requests().into_iter().filter(|r| r.url == url).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, url: &str) -> Option<Scripted> {
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResponse> {
        self.requests.lock().unwrap().push(Request {
            url: url.to_string(),
            etag: etag.map(String::from),
            last_modified: last_modified.map(String::from),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_response(url) {
            Some(Scripted::Content {
                body,
                etag,
                last_modified,
            }) => Ok(FetchResponse::Content {
                body: body.into_bytes(),
                etag,
                last_modified,
            }),
            Some(Scripted::NotModified) => Ok(FetchResponse::NotModified),
            Some(Scripted::Fail(message)) => Err(RssqError::Transport(message)),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(RssqError::Transport(format!("no route to {}", url))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_response_repeats() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script("https://a/", Scripted::Fail("boom".into()));
        fetcher.script("https://a/", Scripted::NotModified);

        tokio_test::block_on(async {
            assert!(fetcher.fetch("https://a/", None, None).await.is_err());
            for _ in 0..2 {
                assert!(matches!(
                    fetcher.fetch("https://a/", Some("\"e\""), None).await,
                    Ok(FetchResponse::NotModified)
                ));
            }
        });

        let requests = fetcher.requests_for("https://a/");
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].etag.as_deref(), Some("\"e\""));
    }
}
