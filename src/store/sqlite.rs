use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, Transaction};
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, RssqError};
use crate::domain::{Feed, FeedId, Item, ItemKey};
use crate::merge::MergeOutcome;
use crate::store::{Snapshot, Store};

/// Layout version, kept in `PRAGMA user_version`. Equals the migration count.
pub const SCHEMA_VERSION: u32 = 2;

const FEED_COLUMNS: &str = "id, url, title, position, etag, last_modified, last_fetched_at,
     consecutive_failures, last_error, enabled, archived_at, created_at, group_name";

const ITEM_COLUMNS: &str =
    "feed_id, stable_id, title, link, summary, published_at, is_read, first_seen_at, is_queued";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// A file that is not a database, or whose schema is newer than
    /// [`SCHEMA_VERSION`], fails with `CorruptState`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn migrations() -> Migrations<'static> {
        Migrations::new(vec![
            M::up(include_str!("../../migrations/001-initial/up.sql")),
            M::up(include_str!("../../migrations/002-groups-and-queue/up.sql")),
        ])
    }

    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.conn()?;

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| RssqError::CorruptState(format!("unreadable database: {}", e)))?;

        if version > i64::from(SCHEMA_VERSION) {
            return Err(RssqError::CorruptState(format!(
                "schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        conn.execute("PRAGMA foreign_keys = ON", [])
            .map_err(|e| RssqError::CorruptState(format!("unreadable database: {}", e)))?;
        Self::migrations()
            .to_latest(&mut conn)
            .map_err(|e| RssqError::CorruptState(format!("migration failed: {}", e)))?;

        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            RssqError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn load_snapshot(conn: &Connection) -> rusqlite::Result<Snapshot> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY position, id"
        ))?;
        let feeds = stmt
            .query_map([], feed_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items ORDER BY feed_id, first_seen_at, stable_id"
        ))?;
        let items = stmt
            .query_map([], item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Snapshot {
            schema_version: SCHEMA_VERSION,
            feeds,
            items,
        })
    }

    fn write_feed(tx: &Transaction<'_>, feed: &Feed) -> rusqlite::Result<usize> {
        tx.execute(
            "UPDATE feeds SET url = ?2, title = ?3, position = ?4, etag = ?5, last_modified = ?6,
                 last_fetched_at = ?7, consecutive_failures = ?8, last_error = ?9, enabled = ?10,
                 archived_at = ?11, group_name = ?12
             WHERE id = ?1",
            params![
                feed.id,
                feed.url,
                feed.title,
                feed.position,
                feed.etag,
                feed.last_modified,
                feed.last_fetched_at.map(|dt| dt.to_rfc3339()),
                feed.consecutive_failures,
                feed.last_error,
                feed.enabled,
                feed.archived_at.map(|dt| dt.to_rfc3339()),
                feed.group,
            ],
        )
    }

    fn insert_item(tx: &Transaction<'_>, item: &Item) -> rusqlite::Result<usize> {
        tx.execute(
            "INSERT INTO items (feed_id, stable_id, title, link, summary, published_at, is_read, first_seen_at, is_queued)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.feed_id,
                item.stable_id,
                item.title,
                item.link,
                item.summary,
                item.published_at.map(|dt| dt.to_rfc3339()),
                item.read,
                item.first_seen_at.to_rfc3339(),
                item.queued,
            ],
        )
    }
}

impl Store for SqliteStore {
    fn load(&self) -> Result<Snapshot> {
        let conn = self.conn()?;
        Self::load_snapshot(&conn)
            .map_err(|e| RssqError::CorruptState(format!("unreadable state: {}", e)))
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(RssqError::CorruptState(format!(
                "refusing to persist snapshot of schema version {} (expected {})",
                snapshot.schema_version, SCHEMA_VERSION
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM items", [])?;
        tx.execute("DELETE FROM feeds", [])?;

        for feed in &snapshot.feeds {
            tx.execute(
                "INSERT INTO feeds (id, url, created_at) VALUES (?1, ?2, ?3)",
                params![feed.id, feed.url, feed.created_at.to_rfc3339()],
            )?;
            Self::write_feed(&tx, feed)?;
        }
        for item in &snapshot.items {
            Self::insert_item(&tx, item)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn insert_feed(&self, feed: &Feed) -> Result<FeedId> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO feeds (url, created_at) VALUES (?1, ?2)",
            params![feed.url, feed.created_at.to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();

        let mut stored = feed.clone();
        stored.id = id;
        Self::write_feed(&tx, &stored)?;

        tx.commit()?;
        Ok(id)
    }

    fn update_feed(&self, feed: &Feed) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = Self::write_feed(&tx, feed)?;
        tx.commit()?;

        if changed == 0 {
            return Err(RssqError::FeedNotFound(feed.id.to_string()));
        }
        Ok(())
    }

    fn delete_feed(&self, id: FeedId) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn apply_refresh(&self, feed: &Feed, outcome: &MergeOutcome) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if Self::write_feed(&tx, feed)? == 0 {
            return Err(RssqError::FeedNotFound(feed.id.to_string()));
        }

        for item in &outcome.new_items {
            Self::insert_item(&tx, item)?;
        }

        // Only metadata; read and queued flags have their own setters.
        for item in &outcome.updated_items {
            tx.execute(
                "UPDATE items SET title = ?3, summary = ?4 WHERE feed_id = ?1 AND stable_id = ?2",
                params![item.feed_id, item.stable_id, item.title, item.summary],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn set_read(&self, key: &ItemKey, read: bool) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE items SET is_read = ?3 WHERE feed_id = ?1 AND stable_id = ?2",
            params![key.feed_id, key.stable_id, read],
        )?;
        Ok(changed > 0)
    }

    fn set_read_many(&self, keys: &[ItemKey], read: bool) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;

        for key in keys {
            count += tx.execute(
                "UPDATE items SET is_read = ?3 WHERE feed_id = ?1 AND stable_id = ?2",
                params![key.feed_id, key.stable_id, read],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }

    fn set_queued(&self, key: &ItemKey, queued: bool) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE items SET is_queued = ?3 WHERE feed_id = ?1 AND stable_id = ?2",
            params![key.feed_id, key.stable_id, queued],
        )?;
        Ok(changed > 0)
    }

    fn delete_items(&self, keys: &[ItemKey]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;

        for key in keys {
            count += tx.execute(
                "DELETE FROM items WHERE feed_id = ?1 AND stable_id = ?2",
                params![key.feed_id, key.stable_id],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| s.parse::<DateTime<Utc>>().ok())
}

fn required_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp {:?}", raw).into(),
        )
    })
}

fn optional_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        position: row.get(3)?,
        etag: row.get(4)?,
        last_modified: row.get(5)?,
        last_fetched_at: optional_datetime(row, 6)?,
        consecutive_failures: row.get(7)?,
        last_error: row.get(8)?,
        enabled: row.get(9)?,
        archived_at: optional_datetime(row, 10)?,
        created_at: required_datetime(row, 11)?,
        group: row.get(12)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        feed_id: row.get(0)?,
        stable_id: row.get(1)?,
        title: row.get(2)?,
        link: row.get(3)?,
        summary: row.get(4)?,
        published_at: optional_datetime(row, 5)?,
        read: row.get(6)?,
        first_seen_at: required_datetime(row, 7)?,
        queued: row.get(8)?,
    })
}
