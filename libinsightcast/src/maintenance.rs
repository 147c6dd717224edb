//! Cache maintenance: pre-seeding and statistics

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::cache::{CacheLayout, CacheNamespace, MarkerStore};
use crate::error::Result;
use crate::rate_limiter::{GuardStatus, RateLimitGuard};
use crate::source::ItemSource;
use crate::store::ProcessedStore;
use crate::types::{LatestMarker, ProcessedRecord, RateLimitRecord};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub fetched: usize,
    pub added: usize,
    pub already_present: usize,
    pub total: usize,
}

/// Mark the current remote items as processed without posting them
///
/// Every fetched item is recorded regardless of age, so nothing currently
/// visible upstream will be posted on the first real run. The store is saved
/// once at the end.
pub async fn preseed(
    source: &dyn ItemSource,
    store: &mut ProcessedStore,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<SeedReport> {
    let items = source.fetch_latest_items(limit).await?;

    let mut added = 0;
    let mut already_present = 0;
    // Oldest first so the newest items are the last to be evicted
    for item in items.iter().rev() {
        if store.insert(ProcessedRecord::seeded(item, now)) {
            added += 1;
        } else {
            already_present += 1;
        }
    }
    if added > 0 {
        store.save()?;
    }

    info!(
        "Pre-seeded {} of {} fetched items into {}",
        added,
        items.len(),
        store.path().display()
    );

    Ok(SeedReport {
        fetched: items.len(),
        added,
        already_present,
        total: store.len(),
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSummary {
    /// "absent", "active" or "expired"
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RateLimitRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub namespace: CacheNamespace,
    pub dir: PathBuf,
    pub processed: usize,
    pub max_entries: usize,
    pub oldest_processed_at: Option<DateTime<Utc>>,
    pub newest_processed_at: Option<DateTime<Utc>>,
    pub by_platform: BTreeMap<String, usize>,
    pub latest: Option<LatestMarker>,
    pub rate_limit: RateLimitSummary,
}

/// Collect a snapshot of the cache for one namespace
pub fn cache_stats(layout: &CacheLayout, store: &ProcessedStore, now: DateTime<Utc>) -> CacheStats {
    let mut by_platform = BTreeMap::new();
    for record in store.records() {
        *by_platform.entry(record.platform.clone()).or_insert(0) += 1;
    }

    let rate_limit = match RateLimitGuard::new(layout).status(now) {
        GuardStatus::Absent => RateLimitSummary {
            status: "absent",
            record: None,
            remaining_secs: None,
        },
        GuardStatus::Active(record) => RateLimitSummary {
            status: "active",
            remaining_secs: record.remaining(now).map(|d| d.as_secs()),
            record: Some(record),
        },
        GuardStatus::Expired(record) => RateLimitSummary {
            status: "expired",
            record: Some(record),
            remaining_secs: None,
        },
    };

    CacheStats {
        namespace: layout.namespace(),
        dir: layout.dir().to_path_buf(),
        processed: store.len(),
        max_entries: store.max_entries(),
        oldest_processed_at: store.records().map(|r| r.processed_at).min(),
        newest_processed_at: store.records().map(|r| r.processed_at).max(),
        by_platform,
        latest: MarkerStore::new(layout).load(),
        rate_limit,
    }
}
