pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rssq")]
#[command(about = "Aggregate RSS/Atom feeds into one timeline", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ~/.config/rssq/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding the configured one
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Maximum number of feeds fetched at once, overriding the configured value
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a new feed and fetch it
    Add {
        /// URL of the feed to add
        url: String,
    },
    /// Remove a feed
    Remove {
        /// Feed id or URL
        feed: String,
    },
    /// List feeds with their health
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Import feeds from an OPML file
    Import {
        /// Path to the OPML file
        path: PathBuf,
    },
    /// Fetch feeds now, ignoring their schedule
    Refresh {
        /// Only this feed (id or URL)
        feed: Option<String>,
    },
    /// Keep refreshing on schedule until interrupted
    Watch {
        /// Print status events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show the merged timeline, newest first
    Timeline {
        /// Only unread items
        #[arg(short, long, conflicts_with = "all")]
        unread: bool,

        /// Include read items even if the config defaults to unread only
        #[arg(short, long)]
        all: bool,

        /// Only items saved for later
        #[arg(short, long)]
        queued: bool,

        /// Only items of this feed (id or URL)
        #[arg(short, long)]
        feed: Option<String>,

        /// Only items of feeds in this group
        #[arg(short, long)]
        group: Option<String>,

        /// Zero-based page number
        #[arg(short, long, default_value_t = 0)]
        page: usize,

        /// Entries per page
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Mark an item as read
    Read {
        /// Item key as shown by `timeline` (<feed_id>:<stable_id>)
        key: String,
    },
    /// Mark an item as unread
    Unread {
        /// Item key as shown by `timeline` (<feed_id>:<stable_id>)
        key: String,
    },
    /// Save an item for later
    Queue {
        /// Item key as shown by `timeline` (<feed_id>:<stable_id>)
        key: String,
    },
    /// Take an item off the read-later queue
    Unqueue {
        /// Item key as shown by `timeline` (<feed_id>:<stable_id>)
        key: String,
    },
    /// Mark every item (of one feed) as read
    ReadAll {
        /// Only items of this feed (id or URL)
        #[arg(short, long)]
        feed: Option<String>,
    },
    /// Open an item's link and mark it read
    Open {
        /// Item key as shown by `timeline` (<feed_id>:<stable_id>)
        key: String,

        /// Application to open the link with instead of the default browser
        #[arg(long)]
        with: Option<String>,
    },
    /// File a feed under a group, or ungroup it when no name is given
    Group {
        /// Feed id or URL
        feed: String,

        /// Group name
        name: Option<String>,
    },
    /// List groups with their unread counts
    Groups {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Resume refreshing a feed
    Enable {
        /// Feed id or URL
        feed: String,
    },
    /// Stop refreshing a feed without removing it
    Disable {
        /// Feed id or URL
        feed: String,
    },
}
