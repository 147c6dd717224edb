//! Durable rate-limit guard
//!
//! Keeps platform-imposed cooldowns across process restarts. Each run is a
//! short-lived process, so the only state is the record persisted in the
//! cache directory; it is reloaded at the start of every batch.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::{read_json, remove_file, write_json_atomic, CacheLayout};
use crate::error::{InsightcastError, PlatformError, Result};
use crate::platforms::Platform;
use crate::types::{LimitType, RateLimitRecord, RateLimitSignal};
use std::path::{Path, PathBuf};

/// One quota reading taken from a platform response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStatus {
    pub limit_type: LimitType,
    pub remaining: u64,
    /// Unix seconds
    pub reset_at: i64,
}

impl QuotaStatus {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// Pick the most specific exhausted tier: user-daily, then app-daily, then general
pub fn select_exhausted_tier(quotas: &[QuotaStatus]) -> Option<RateLimitSignal> {
    quotas
        .iter()
        .filter(|q| q.is_exhausted())
        .max_by_key(|q| q.limit_type.specificity())
        .map(|q| RateLimitSignal {
            limit_type: q.limit_type,
            reset_at: q.reset_at,
            details: format!("{} quota exhausted", q.limit_type),
        })
}

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    /// Persisted cooldown; no network call was made
    Cache,
    /// Live probe against the platform
    Probe,
    /// Probe disabled or not offered by the platform
    Unchecked,
}

/// Answer to "may this batch post?"
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub can_post: bool,
    pub reason: String,
    /// Unix seconds at which the blocking quota resets
    pub reset_at: Option<i64>,
    pub source: VerdictSource,
    /// The cooldown that blocks the batch, if any
    pub record: Option<RateLimitRecord>,
}

impl Verdict {
    fn clear(source: VerdictSource, reason: impl Into<String>) -> Self {
        Self {
            can_post: true,
            reason: reason.into(),
            reset_at: None,
            source,
            record: None,
        }
    }

    fn blocked(source: VerdictSource, record: RateLimitRecord, now: DateTime<Utc>) -> Self {
        Self {
            can_post: false,
            reason: describe(&record, now),
            reset_at: Some(record.reset_timestamp),
            source,
            record: Some(record),
        }
    }
}

/// State of the persisted record, for reporting
#[derive(Debug, Clone, PartialEq)]
pub enum GuardStatus {
    Absent,
    Active(RateLimitRecord),
    Expired(RateLimitRecord),
}

pub struct RateLimitGuard {
    path: PathBuf,
    probe_enabled: bool,
}

impl RateLimitGuard {
    pub fn new(layout: &CacheLayout) -> Self {
        Self {
            path: layout.rate_limit_path(),
            probe_enabled: true,
        }
    }

    /// Enable or disable the live probe; the persisted record is always honoured
    pub fn with_probe(mut self, enabled: bool) -> Self {
        self.probe_enabled = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted record; unreadable files count as absent
    pub fn load(&self) -> Option<RateLimitRecord> {
        match read_json::<RateLimitRecord>(&self.path) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Ignoring unreadable rate-limit record {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> GuardStatus {
        match self.load() {
            None => GuardStatus::Absent,
            Some(record) if record.is_active(now) => GuardStatus::Active(record),
            Some(record) => GuardStatus::Expired(record),
        }
    }

    /// Decide whether a batch may start
    ///
    /// An unexpired persisted cooldown blocks without touching the network.
    /// Otherwise the platform is probed: a rate-limit signal is persisted and
    /// blocks, rejected credentials block, and a network failure is treated
    /// as inconclusive.
    pub async fn check_before_batch(
        &self,
        platform: &dyn Platform,
        now: DateTime<Utc>,
    ) -> Result<Verdict> {
        match self.status(now) {
            GuardStatus::Active(record) => {
                return Ok(Verdict::blocked(VerdictSource::Cache, record, now));
            }
            GuardStatus::Expired(record) => {
                info!(
                    "Rate-limit cooldown ({}) expired at {}, removing record",
                    record.limit_type, record.reset_timestamp
                );
                if let Err(e) = self.clear() {
                    warn!("Failed to remove expired rate-limit record: {}", e);
                }
            }
            GuardStatus::Absent => {}
        }

        if !self.probe_enabled {
            return Ok(Verdict::clear(VerdictSource::Unchecked, "live probe disabled"));
        }

        match platform.probe().await {
            Ok(report) if !report.supported => Ok(Verdict::clear(
                VerdictSource::Unchecked,
                format!("{} offers no probe", platform.name()),
            )),
            Ok(report) => {
                if let Some(signal) = select_exhausted_tier(&report.quotas) {
                    let record = self.record_signal(&signal, now)?;
                    return Ok(Verdict::blocked(VerdictSource::Probe, record, now));
                }
                let who = report.identity.as_deref().unwrap_or("unknown account");
                debug!("{} probe ok as {}", platform.name(), who);
                Ok(Verdict::clear(
                    VerdictSource::Probe,
                    format!("{} reachable as {}", platform.name(), who),
                ))
            }
            Err(InsightcastError::Platform(PlatformError::RateLimit(signal))) => {
                let record = self.record_signal(&signal, now)?;
                Ok(Verdict::blocked(VerdictSource::Probe, record, now))
            }
            Err(InsightcastError::Platform(PlatformError::Network(e))) => {
                warn!(
                    "{} probe inconclusive, continuing: {}",
                    platform.name(),
                    e
                );
                Ok(Verdict::clear(VerdictSource::Probe, format!("probe inconclusive: {}", e)))
            }
            Err(e) => Ok(Verdict {
                can_post: false,
                reason: format!("{} probe failed: {}", platform.name(), e),
                reset_at: None,
                source: VerdictSource::Probe,
                record: None,
            }),
        }
    }

    /// Persist the cooldown carried by a failed post, if it is rate-limit class
    pub fn record_failure(
        &self,
        error: &InsightcastError,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitRecord>> {
        match error.rate_limit_signal() {
            Some(signal) => self.record_signal(signal, now).map(Some),
            None => Ok(None),
        }
    }

    /// Persist a cooldown, replacing any earlier record
    pub fn record_signal(
        &self,
        signal: &RateLimitSignal,
        now: DateTime<Utc>,
    ) -> Result<RateLimitRecord> {
        let record = RateLimitRecord::from_signal(signal, now);
        write_json_atomic(&self.path, &record)?;
        warn!("Rate limit recorded: {}", describe(&record, now));
        Ok(record)
    }

    /// Delete the persisted record; returns whether one existed
    pub fn clear(&self) -> Result<bool> {
        remove_file(&self.path)
    }
}

/// Human-readable cooldown summary
pub fn describe(record: &RateLimitRecord, now: DateTime<Utc>) -> String {
    let reset = DateTime::<Utc>::from_timestamp(record.reset_timestamp, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| record.reset_timestamp.to_string());
    match record.remaining(now) {
        Some(left) => format!(
            "{} limit until {} ({} left): {}",
            record.limit_type,
            reset,
            humantime::format_duration(left),
            record.details
        ),
        None => format!(
            "{} limit expired at {}: {}",
            record.limit_type, reset, record.details
        ),
    }
}
