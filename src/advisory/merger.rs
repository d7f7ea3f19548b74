use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;

use super::types::{AdvisoryRecord, FeedDocument};

/// Result of a merge, with counters the caller can log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub document: FeedDocument,
    /// Records newly added to the feed.
    pub inserted: usize,
    /// Records skipped because their identity key was already present.
    pub skipped: usize,
    /// Items removed from the tail to respect the retention bound.
    pub dropped: usize,
    /// Explicitly dated new records older than the feed's newest existing
    /// item. They are still prepended, so the feed is out of chronological
    /// order when this is non-zero.
    pub backdated: usize,
}

/// Merges newly extracted records into a feed, stamping `last_updated` with
/// the current time.
///
/// See [`merge_at`].
pub fn merge(
    existing: FeedDocument,
    new_records: Vec<AdvisoryRecord>,
    max_items: usize,
) -> FeedDocument {
    merge_at(existing, new_records, max_items, Utc::now()).document
}

/// Merges `new_records` into `existing`.
///
/// - Records whose identity key is already in the feed (or earlier in the
///   same batch) are skipped.
/// - The inserted records form one block, explicitly dated records first,
///   each group newest first, ties kept in extraction order.
/// - The block is prepended to the existing items, whose relative order is
///   never changed.
/// - The tail is truncated to `max_items`.
/// - `last_updated` becomes `now`, even when nothing was inserted.
pub fn merge_at(
    existing: FeedDocument,
    new_records: Vec<AdvisoryRecord>,
    max_items: usize,
    now: DateTime<Utc>,
) -> Merged {
    let FeedDocument {
        region_slug,
        items: existing_items,
        ..
    } = existing;

    let mut seen: HashSet<String> = existing_items
        .iter()
        .map(|item| item.identity_key.clone())
        .collect();

    let mut block = Vec::new();
    let mut skipped = 0;
    for record in new_records {
        if seen.insert(record.identity_key.clone()) {
            block.push(record);
        } else {
            skipped += 1;
        }
    }
    block.sort_by(newest_confident_first);

    let newest_existing = existing_items.iter().map(|i| i.published_at).max();
    let backdated = match newest_existing {
        Some(newest) => block
            .iter()
            .filter(|r| !r.is_approximate() && r.published_at < newest)
            .count(),
        None => 0,
    };

    let inserted = block.len();
    let mut items = block;
    items.extend(existing_items);

    let dropped = items.len().saturating_sub(max_items);
    items.truncate(max_items);

    if inserted > 0 || dropped > 0 {
        tracing::debug!(
            region = %region_slug,
            inserted = inserted,
            skipped = skipped,
            dropped = dropped,
            "Merged advisories into feed"
        );
    }

    Merged {
        document: FeedDocument {
            region_slug,
            items,
            last_updated: Some(now),
        },
        inserted,
        skipped,
        dropped,
        backdated,
    }
}

/// Explicit timestamps before approximate ones, then newest first.
fn newest_confident_first(a: &AdvisoryRecord, b: &AdvisoryRecord) -> Ordering {
    a.is_approximate()
        .cmp(&b.is_approximate())
        .then_with(|| b.published_at.cmp(&a.published_at))
}
