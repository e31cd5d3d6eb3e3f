//! In-memory view of feeds and items backed by a durable [`Store`].
//!
//! All mutation goes through one write guard: the durable write happens
//! first and memory is only touched once it succeeded, so a failed write
//! never leaves the two out of step. Readers share the lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::app::{Result, RssqError};
use crate::domain::{CursorUpdate, Feed, FeedGroup, FeedId, Item, ItemKey};
use crate::merge::{self, MergeOptions, MergeOutcome};
use crate::store::{Snapshot, Store, SCHEMA_VERSION};

/// What to do with a feed's items when the feed is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Delete the items together with the feed.
    #[default]
    Purge,
    /// Archive the feed and keep its items in the timeline.
    Retain,
}

/// The loaded data set. Borrowed by readers through [`StateStore::read`].
#[derive(Debug, Default)]
pub struct Library {
    feeds: Vec<Feed>,
    items: HashMap<FeedId, Vec<Item>>,
}

impl Library {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut feeds = snapshot.feeds;
        feeds.sort_by_key(|f| (f.position, f.id));

        let mut items: HashMap<FeedId, Vec<Item>> = HashMap::new();
        for item in snapshot.items {
            items.entry(item.feed_id).or_default().push(item);
        }

        Self { feeds, items }
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            schema_version: SCHEMA_VERSION,
            feeds: self.feeds.clone(),
            items: self.items().cloned().collect(),
        }
    }

    /// Every feed, archived ones included, in configuration order.
    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    pub fn feed(&self, id: FeedId) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.id == id)
    }

    pub fn feed_by_url(&self, url: &str) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.url == url)
    }

    fn feed_mut(&mut self, id: FeedId) -> Option<&mut Feed> {
        self.feeds.iter_mut().find(|f| f.id == id)
    }

    /// A copy of the feed, unless it is unknown or archived.
    fn active_feed(&self, id: FeedId) -> Result<Feed> {
        self.feed(id)
            .filter(|f| !f.is_archived())
            .cloned()
            .ok_or_else(|| RssqError::FeedNotFound(id.to_string()))
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values().flatten()
    }

    pub fn items_for(&self, feed_id: FeedId) -> &[Item] {
        self.items.get(&feed_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn item(&self, key: &ItemKey) -> Option<&Item> {
        self.items_for(key.feed_id)
            .iter()
            .find(|i| i.stable_id == key.stable_id)
    }

    fn item_mut(&mut self, key: &ItemKey) -> Option<&mut Item> {
        self.items
            .get_mut(&key.feed_id)?
            .iter_mut()
            .find(|i| i.stable_id == key.stable_id)
    }

    pub fn unread_count(&self, feed_id: Option<FeedId>) -> usize {
        match feed_id {
            Some(id) => self.items_for(id).iter().filter(|i| !i.read).count(),
            None => self.items().filter(|i| !i.read).count(),
        }
    }

    /// Groups of active feeds, in the order their first member appears.
    pub fn groups(&self) -> Vec<FeedGroup> {
        let mut groups: Vec<FeedGroup> = Vec::new();
        for feed in self.feeds.iter().filter(|f| !f.is_archived()) {
            let Some(name) = &feed.group else { continue };
            let unread = self.unread_count(Some(feed.id));
            match groups.iter_mut().find(|g| &g.name == name) {
                Some(group) => {
                    group.feeds.push(feed.id);
                    group.unread += unread;
                }
                None => groups.push(FeedGroup {
                    name: name.clone(),
                    feeds: vec![feed.id],
                    unread,
                }),
            }
        }
        groups
    }

    fn next_position(&self) -> i64 {
        self.feeds.iter().map(|f| f.position + 1).max().unwrap_or(0)
    }
}

pub struct StateStore {
    store: Arc<dyn Store>,
    library: RwLock<Library>,
}

impl StateStore {
    /// Loads the persisted state; unreadable data fails with `CorruptState`.
    pub fn load(store: Arc<dyn Store>) -> Result<Self> {
        let snapshot = store.load()?;
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(RssqError::CorruptState(format!(
                "snapshot has schema version {}, expected {}",
                snapshot.schema_version, SCHEMA_VERSION
            )));
        }

        tracing::debug!(
            "Loaded {} feeds and {} items",
            snapshot.feeds.len(),
            snapshot.items.len()
        );

        Ok(Self {
            store,
            library: RwLock::new(Library::from_snapshot(snapshot)),
        })
    }

    /// Like [`StateStore::load`], but starts empty when the state is corrupt.
    ///
    /// The corruption is returned alongside so the caller can surface it.
    pub fn load_or_empty(store: Arc<dyn Store>) -> Result<(Self, Option<RssqError>)> {
        match Self::load(Arc::clone(&store)) {
            Ok(state) => Ok((state, None)),
            Err(err @ RssqError::CorruptState(_)) => {
                tracing::warn!("Starting from empty state: {}", err);
                let state = Self {
                    store,
                    library: RwLock::new(Library::default()),
                };
                Ok((state, Some(err)))
            }
            Err(err) => Err(err),
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Library> {
        self.library.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, Library>> {
        self.library
            .write()
            .map_err(|e| RssqError::Other(format!("state lock poisoned: {}", e)))
    }

    /// Runs `f` against the current data under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&Library) -> R) -> R {
        f(&self.read_guard())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.read_guard().to_snapshot()
    }

    /// Replaces the entire state. On failure the previous state stays in place.
    pub fn persist(&self, snapshot: Snapshot) -> Result<()> {
        let mut library = self.write_guard()?;
        self.store.persist(&snapshot)?;
        *library = Library::from_snapshot(snapshot);
        Ok(())
    }

    pub fn feeds(&self) -> Vec<Feed> {
        self.read_guard().feeds.clone()
    }

    pub fn feed(&self, id: FeedId) -> Option<Feed> {
        self.read_guard().feed(id).cloned()
    }

    /// Registers `url`, returning the id of an existing feed with the same URL.
    ///
    /// An archived feed with that URL is brought back with its history.
    pub fn add_feed(&self, url: &str, now: DateTime<Utc>) -> Result<FeedId> {
        let mut library = self.write_guard()?;

        if let Some(existing) = library.feed_by_url(url) {
            if !existing.is_archived() {
                return Ok(existing.id);
            }

            let mut revived = existing.clone();
            revived.archived_at = None;
            revived.position = library.next_position();
            self.store.update_feed(&revived)?;

            tracing::info!("Revived archived feed {} ({})", revived.id, url);
            let id = revived.id;
            if let Some(slot) = library.feed_mut(id) {
                *slot = revived;
            }
            library.feeds.sort_by_key(|f| (f.position, f.id));
            return Ok(id);
        }

        let mut feed = Feed::new(url.to_string(), now);
        feed.position = library.next_position();
        feed.id = self.store.insert_feed(&feed)?;

        let id = feed.id;
        library.feeds.push(feed);
        Ok(id)
    }

    /// Applies `f` to a copy of the feed, stores it, then swaps it in.
    ///
    /// Archived feeds are `FeedNotFound`; only [`StateStore::add_feed`] brings them back.
    pub fn update_feed(&self, id: FeedId, f: impl FnOnce(&mut Feed)) -> Result<Feed> {
        let mut library = self.write_guard()?;
        let mut feed = library.active_feed(id)?;

        f(&mut feed);
        self.store.update_feed(&feed)?;

        if let Some(slot) = library.feed_mut(id) {
            *slot = feed.clone();
        }
        Ok(feed)
    }

    /// Updates only the fetch cursor; items are left alone.
    pub fn record_cursor(&self, id: FeedId, update: &CursorUpdate) -> Result<Feed> {
        self.update_feed(id, |feed| feed.apply_cursor(update))
    }

    /// Removes an active feed according to `policy`.
    pub fn remove_feed(
        &self,
        id: FeedId,
        policy: RemovalPolicy,
        now: DateTime<Utc>,
    ) -> Result<Feed> {
        let mut library = self.write_guard()?;
        let feed = library.active_feed(id)?;

        match policy {
            RemovalPolicy::Purge => {
                self.store.delete_feed(id)?;
                library.feeds.retain(|f| f.id != id);
                library.items.remove(&id);
                Ok(feed)
            }
            RemovalPolicy::Retain => {
                let mut archived = feed;
                archived.archived_at = Some(now);
                archived.etag = None;
                archived.last_modified = None;
                self.store.update_feed(&archived)?;

                if let Some(slot) = library.feed_mut(id) {
                    *slot = archived.clone();
                }
                Ok(archived)
            }
        }
    }

    /// Records a successful fetch: cursor and merged items in one durable write.
    ///
    /// `title` fills in the feed title when it has none yet. A feed archived
    /// while its fetch was running is `FeedNotFound` and nothing is written.
    pub fn apply_refresh(
        &self,
        feed_id: FeedId,
        update: &CursorUpdate,
        candidates: Vec<Item>,
        title: Option<String>,
        options: MergeOptions,
    ) -> Result<(Feed, MergeOutcome)> {
        let mut library = self.write_guard()?;
        let mut feed = library.active_feed(feed_id)?;

        feed.apply_cursor(update);
        if feed.title.is_none() {
            feed.title = title.filter(|t| !t.is_empty());
        }

        let outcome = merge::merge_with(
            feed_id,
            candidates,
            library.items_for(feed_id),
            update.fetched_at,
            options,
        );

        self.store.apply_refresh(&feed, &outcome)?;

        if let Some(slot) = library.feed_mut(feed_id) {
            *slot = feed.clone();
        }
        merge::apply(library.items.entry(feed_id).or_default(), &outcome);

        Ok((feed, outcome))
    }

    /// Sets the read flag of one item. Visible to readers as soon as it returns.
    pub fn mark_read(&self, key: &ItemKey, read: bool) -> Result<()> {
        let mut library = self.write_guard()?;
        if library.item(key).is_none() {
            return Err(RssqError::ItemNotFound(key.to_string()));
        }

        if !self.store.set_read(key, read)? {
            return Err(RssqError::ItemNotFound(key.to_string()));
        }

        if let Some(item) = library.item_mut(key) {
            item.read = read;
        }
        Ok(())
    }

    /// Marks every unread item (optionally of one feed) as read, all or nothing.
    pub fn mark_all_read(&self, feed_id: Option<FeedId>) -> Result<usize> {
        let mut library = self.write_guard()?;
        let keys: Vec<ItemKey> = library
            .items()
            .filter(|i| !i.read && feed_id.map_or(true, |id| i.feed_id == id))
            .map(Item::key)
            .collect();

        if keys.is_empty() {
            return Ok(0);
        }
        let marked = self.store.set_read_many(&keys, true)?;

        for key in &keys {
            if let Some(item) = library.item_mut(key) {
                item.read = true;
            }
        }
        Ok(marked)
    }

    /// Adds the item to, or takes it off, the read-later queue.
    pub fn mark_queued(&self, key: &ItemKey, queued: bool) -> Result<()> {
        let mut library = self.write_guard()?;
        if library.item(key).is_none() || !self.store.set_queued(key, queued)? {
            return Err(RssqError::ItemNotFound(key.to_string()));
        }

        if let Some(item) = library.item_mut(key) {
            item.queued = queued;
        }
        Ok(())
    }

    /// Drops items that [`Item::is_expired`] at `cutoff`.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut library = self.write_guard()?;
        let expired: Vec<ItemKey> = library
            .items()
            .filter(|i| i.is_expired(cutoff))
            .map(Item::key)
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        let removed = self.store.delete_items(&expired)?;
        for items in library.items.values_mut() {
            items.retain(|i| !i.is_expired(cutoff));
        }

        tracing::info!("Pruned {} items older than {}", removed, cutoff);
        Ok(removed)
    }

    pub fn unread_count(&self, feed_id: Option<FeedId>) -> usize {
        self.read_guard().unread_count(feed_id)
    }

    pub fn groups(&self) -> Vec<FeedGroup> {
        self.read_guard().groups()
    }
}
