//! Chronological ordering and minimum-age gate for fetched items

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::types::{Item, LatestMarker};

/// Decides which fetched items are old enough to publish
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    minimum_age: Duration,
}

impl EligibilityFilter {
    pub fn new(minimum_age: Duration) -> Self {
        Self { minimum_age }
    }

    pub fn from_minutes(minutes: i64) -> Self {
        Self::new(Duration::minutes(minutes))
    }

    pub fn minimum_age(&self) -> Duration {
        self.minimum_age
    }

    /// Turn a newest-first batch into the oldest-first list of eligible items
    ///
    /// Items without a parsable publication time are dropped. Items younger
    /// than the minimum age (including ones dated in the future) are held
    /// back for a later run. The result is ordered by publication time; items
    /// sharing a timestamp keep their reversed API order.
    pub fn eligible(&self, items: Vec<Item>, now: DateTime<Utc>) -> Vec<Item> {
        let mut eligible: Vec<(DateTime<Utc>, Item)> = items
            .into_iter()
            .rev()
            .filter_map(|item| {
                let published_at = self.old_enough(&item, now)?;
                Some((published_at, item))
            })
            .collect();

        eligible.sort_by_key(|(published_at, _)| *published_at);
        eligible.into_iter().map(|(_, item)| item).collect()
    }

    fn old_enough(&self, item: &Item, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let Some(published_at) = item.published_at() else {
            warn!(
                "Skipping item {}: missing or unparsable publishedAt {:?}",
                item.id, item.published_at
            );
            return None;
        };

        let age = now - published_at;
        if age < self.minimum_age {
            debug!(
                "Holding item {}: {}s old, needs {}s",
                item.id,
                age.num_seconds(),
                self.minimum_age.num_seconds()
            );
            return None;
        }
        Some(published_at)
    }
}

/// Result of comparing an item against the latest-sent marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerCheck {
    /// No marker, or the item has no usable timestamp
    Unknown,
    /// Published at or after the marker
    NotOlder,
    /// Published strictly before the marker
    OlderThanMarker,
}

/// Compare an item with the latest-sent marker
///
/// Advisory only: callers must have already checked the processed store, and
/// an `OlderThanMarker` answer is never enough on its own to drop an item.
pub fn check_marker(marker: Option<&LatestMarker>, item: &Item) -> MarkerCheck {
    let (Some(marker), Some(published_at)) = (marker, item.published_at()) else {
        return MarkerCheck::Unknown;
    };
    if published_at < marker.published_at {
        MarkerCheck::OlderThanMarker
    } else {
        MarkerCheck::NotOlder
    }
}
