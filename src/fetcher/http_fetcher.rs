use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};

use crate::app::{Result, RssqError};
use crate::fetcher::{FetchResponse, Fetcher};

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Client-level timeout; the scheduler applies its own per-feed limit on top.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(concat!("rssq/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

fn conditional_headers(etag: Option<&str>, last_modified: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(etag) = etag {
        if let Ok(value) = HeaderValue::from_str(etag) {
            headers.insert(IF_NONE_MATCH, value);
        }
    }

    if let Some(last_modified) = last_modified {
        if let Ok(value) = HeaderValue::from_str(last_modified) {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
    }

    headers
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResponse> {
        let headers = conditional_headers(etag, last_modified);
        let response = self.client.get(url).headers(headers).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchResponse::NotModified);
        }
        if !status.is_success() {
            return Err(RssqError::Transport(format!("{} returned {}", url, status)));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response.bytes().await?.to_vec();

        Ok(FetchResponse::Content {
            body,
            etag,
            last_modified,
        })
    }
}
