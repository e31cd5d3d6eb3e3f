//! Per-feed reconciliation of freshly parsed items against known ones.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::domain::{FeedId, Item};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Items seen for the first time, unread.
    pub new_items: Vec<Item>,
    /// Known items whose title or summary changed, carrying their stored state.
    pub updated_items: Vec<Item>,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.new_items.is_empty() && self.updated_items.is_empty()
    }
}

/// Options that narrow which candidates may become new items.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Candidates that [`Item::is_expired`] at this instant are not created.
    pub retention_cutoff: Option<DateTime<Utc>>,
}

pub fn merge(
    feed_id: FeedId,
    candidates: Vec<Item>,
    existing: &[Item],
    now: DateTime<Utc>,
) -> MergeOutcome {
    merge_with(feed_id, candidates, existing, now, MergeOptions::default())
}

pub fn merge_with(
    feed_id: FeedId,
    candidates: Vec<Item>,
    existing: &[Item],
    now: DateTime<Utc>,
    options: MergeOptions,
) -> MergeOutcome {
    let known: HashMap<&str, &Item> = existing
        .iter()
        .filter(|item| item.feed_id == feed_id)
        .map(|item| (item.stable_id.as_str(), item))
        .collect();

    let mut seen = HashSet::new();
    let mut outcome = MergeOutcome::default();

    for candidate in candidates {
        if candidate.feed_id != feed_id {
            tracing::warn!(
                "Ignoring candidate {} for feed {} while merging feed {}",
                candidate.stable_id,
                candidate.feed_id,
                feed_id
            );
            continue;
        }
        if !seen.insert(candidate.stable_id.clone()) {
            continue;
        }

        match known.get(candidate.stable_id.as_str()) {
            Some(current) => {
                if current.title == candidate.title && current.summary == candidate.summary {
                    continue;
                }
                let mut updated = (*current).clone();
                updated.title = candidate.title;
                updated.summary = candidate.summary;
                outcome.updated_items.push(updated);
            }
            None => {
                if options
                    .retention_cutoff
                    .is_some_and(|cutoff| candidate.is_expired(cutoff))
                {
                    continue;
                }
                let mut item = candidate;
                item.read = false;
                item.queued = false;
                item.first_seen_at = now;
                outcome.new_items.push(item);
            }
        }
    }

    outcome
}

/// Applies an outcome to an in-memory item list.
///
/// Only title and summary of known items change; `read`, `queued` and
/// `first_seen_at` keep the values already in `items`.
pub fn apply(items: &mut Vec<Item>, outcome: &MergeOutcome) {
    for updated in &outcome.updated_items {
        if let Some(item) = items.iter_mut().find(|i| i.stable_id == updated.stable_id) {
            item.title = updated.title.clone();
            item.summary = updated.summary.clone();
        }
    }
    items.extend(outcome.new_items.iter().cloned());
}
