//! Configuration management for rssq.
//!
//! Configuration is read from `~/.config/rssq/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

pub mod duration;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RefreshPolicy;
use crate::state::RemovalPolicy;

/// Main configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database location; defaults to the platform data directory.
    pub database: Option<PathBuf>,
    pub sync: SyncConfig,
}

/// Settings for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How often a healthy feed is fetched.
    #[serde(with = "duration::serde_str")]
    pub refresh_interval: Duration,
    /// Maximum number of fetches in flight.
    pub concurrency: usize,
    #[serde(with = "duration::serde_str")]
    pub fetch_timeout: Duration,
    /// Upper bound for the failure backoff.
    #[serde(with = "duration::serde_str")]
    pub max_backoff: Duration,
    /// Consecutive failures after which a feed is reported as degraded. 0 disables.
    pub degraded_after: u32,
    /// Tick of the background service.
    #[serde(with = "duration::serde_str")]
    pub check_interval: Duration,
    /// Items older than this are pruned after each pass.
    #[serde(with = "duration::serde_opt")]
    pub retention: Option<Duration>,
    pub on_remove: RemovalPolicy,
    /// Default timeline filter.
    pub unread_only: bool,
    /// Feed URLs registered at startup, in order.
    pub feeds: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(15 * 60),
            concurrency: 8,
            fetch_timeout: Duration::from_secs(30),
            max_backoff: Duration::from_secs(6 * 3600),
            degraded_after: 5,
            check_interval: Duration::from_secs(60),
            retention: None,
            on_remove: RemovalPolicy::Purge,
            unread_only: false,
            feeds: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            refresh_interval: self.refresh_interval,
            max_backoff: self.max_backoff,
        }
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Invalid("refresh_interval must not be zero".into()));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid("fetch_timeout must not be zero".into()));
        }
        if self.check_interval.is_zero() {
            return Err(ConfigError::Invalid("check_interval must not be zero".into()));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })?;
        config.sync.validate()?;

        tracing::debug!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    /// Get the default config file path: `~/.config/rssq/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("rssq").join("config.toml"))
    }

    /// Get the default database path: `<data dir>/rssq/rssq.db`
    pub fn default_database_path() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join("rssq").join("rssq.db"))
    }

    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Self::default_database_path(),
        }
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        tracing::info!("Created default configuration at {}", path.display());
        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> &'static str {
        r##"# rssq configuration
#
# Durations are written as "30s", "15m", "6h" or "90d".

# Database file (default: <data dir>/rssq/rssq.db)
# database = "/path/to/rssq.db"

[sync]
# How often each feed is checked for new items
refresh_interval = "15m"

# Maximum number of feeds fetched at the same time
concurrency = 8

# Give up on a single feed after this long
fetch_timeout = "30s"

# Failing feeds back off exponentially, up to this interval
max_backoff = "6h"

# Report a feed as degraded after this many consecutive failures (0 = never)
degraded_after = 5

# How often `rssq watch` looks for due feeds
check_interval = "1m"

# Drop items older than this after each refresh ("off" keeps everything)
retention = "off"

# What happens to a removed feed's items: "purge" or "retain"
on_remove = "purge"

# Show only unread items in the timeline by default
unread_only = false

# Feeds registered on startup, in display order
feeds = [
    # "https://blog.rust-lang.org/feed.xml",
]
"##
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::app::RssqError {
    fn from(err: ConfigError) -> Self {
        crate::app::RssqError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let config: Config = toml::from_str(Config::default_config_content())
            .expect("Default config should be valid TOML");

        assert_eq!(config, Config::default());
        assert!(config.sync.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
database = "/tmp/feeds.db"

[sync]
refresh_interval = "1h"
retention = "90d"
on_remove = "retain"
feeds = ["https://example.com/feed.xml"]
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.database, Some(PathBuf::from("/tmp/feeds.db")));
        assert_eq!(config.sync.refresh_interval, Duration::from_secs(3600));
        assert_eq!(config.sync.retention, Some(Duration::from_secs(90 * 86400)));
        assert_eq!(config.sync.on_remove, RemovalPolicy::Retain);
        assert_eq!(config.sync.feeds.len(), 1);
        // Default value
        assert_eq!(config.sync.concurrency, 8);
        assert_eq!(config.sync.max_backoff, Duration::from_secs(6 * 3600));
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let content = "[sync]\nrefresh_interval = \"soon\"\n";
        assert!(toml::from_str::<Config>(content).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sync]\nconcurrency = 0\n").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_sync_config_round_trips_through_toml() {
        let mut sync = SyncConfig::default();
        sync.retention = Some(Duration::from_secs(30 * 86400));
        let text = toml::to_string(&sync).unwrap();
        let parsed: SyncConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, sync);
    }
}
