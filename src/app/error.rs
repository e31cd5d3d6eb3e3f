use thiserror::Error;

use crate::domain::FeedId;

#[derive(Error, Debug)]
pub enum RssqError {
    #[error("Invalid feed URL: {0}")]
    InvalidFeedUrl(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parsing error: {0}")]
    Parse(String),

    #[error("Unsupported feed format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Feed {0} already has a fetch in flight")]
    ConcurrencyLimitExceeded(FeedId),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Invalid item key {0:?}, expected <feed_id>:<stable_id>")]
    InvalidItemKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl RssqError {
    /// Failures that come from the network rather than from the payload.
    pub fn is_transport(&self) -> bool {
        matches!(self, RssqError::Transport(_) | RssqError::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, RssqError>;
