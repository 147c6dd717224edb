//! Dispatch pipeline
//!
//! One run fetches a batch, keeps the eligible items, checks the rate-limit
//! guard and then posts the remaining items one at a time, oldest first:
//!
//! ```text
//! Idle -> Fetching -> Filtering -> RateLimitCheck -> Dispatching <-> Updating -> Done
//!                                        |                |
//!                                        +------> Halted <+
//! ```
//!
//! Posting is strictly sequential. A rate-limit signal anywhere stops the run
//! after the cooldown is persisted; every other per-item failure is logged and
//! the loop moves on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::{CacheLayout, MarkerStore};
use crate::config::{Config, MAX_MINIMUM_AGE_MINUTES};
use crate::eligibility::{check_marker, EligibilityFilter, MarkerCheck};
use crate::error::{ConfigError, InsightcastError, PlatformError, Result};
use crate::platforms::{build_http_client, create_platform, Attempt, Platform};
use crate::rate_limiter::{RateLimitGuard, VerdictSource};
use crate::render::{BackgroundRenderer, ContentRenderer};
use crate::source::{InsightsClient, ItemSource};
use crate::store::ProcessedStore;
use crate::types::{Item, LatestMarker, OutgoingMessage, PostReceipt, ProcessedRecord, RateLimitRecord};

/// Where the pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Fetching,
    Filtering,
    RateLimitCheck,
    Dispatching,
    Updating,
    Done,
    Halted,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every eligible item was handled (possibly none)
    Done,
    /// Stopped on a rate limit, either detected now or still cooling down
    /// from an earlier run
    Halted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Stage the pipeline was in when the run ended
    pub stage: Stage,
    pub fetched: usize,
    pub eligible: usize,
    pub sent: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    /// Item being posted when the run halted
    pub halted_on: Option<String>,
    pub rate_limit: Option<RateLimitRecord>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Done,
            stage: Stage::Idle,
            fetched: 0,
            eligible: 0,
            sent: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            halted_on: None,
            rate_limit: None,
        }
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Done => 0,
            RunStatus::Halted => 4,
        }
    }
}

/// Tunables taken from the `[source]`, `[cache]` and `[pipeline]` sections
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch_limit: usize,
    pub max_processed_ids: usize,
    pub minimum_age: chrono::Duration,
    pub post_delay: Duration,
    pub max_attempts: usize,
    pub rate_limit_check: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_limit: 10,
            max_processed_ids: 200,
            minimum_age: chrono::Duration::minutes(10),
            post_delay: Duration::from_millis(1000),
            max_attempts: 3,
            rate_limit_check: true,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch_limit: config.source.fetch_limit,
            max_processed_ids: config.cache.max_processed_ids,
            minimum_age: chrono::Duration::minutes(
                config
                    .pipeline
                    .minimum_age_minutes
                    .clamp(0, MAX_MINIMUM_AGE_MINUTES),
            ),
            post_delay: Duration::from_millis(config.pipeline.post_delay_ms),
            max_attempts: config.pipeline.max_attempts,
            rate_limit_check: config.pipeline.rate_limit_check,
        }
    }
}

pub struct Pipeline {
    source: Box<dyn ItemSource>,
    renderer: Box<dyn ContentRenderer>,
    platform: Box<dyn Platform>,
    store: ProcessedStore,
    markers: MarkerStore,
    guard: RateLimitGuard,
    filter: EligibilityFilter,
    settings: PipelineSettings,
    stage: Stage,
}

impl Pipeline {
    /// Assemble a pipeline; the processed store is loaded here
    pub fn new(
        source: Box<dyn ItemSource>,
        renderer: Box<dyn ContentRenderer>,
        platform: Box<dyn Platform>,
        layout: &CacheLayout,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            renderer,
            platform,
            store: ProcessedStore::open(layout, settings.max_processed_ids),
            markers: MarkerStore::new(layout),
            guard: RateLimitGuard::new(layout).with_probe(settings.rate_limit_check),
            filter: EligibilityFilter::new(settings.minimum_age),
            settings,
            stage: Stage::Idle,
        }
    }

    /// Build the production pipeline for a validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_platform(config, create_platform(config)?)
    }

    /// Production source, renderer and cache around a given platform
    pub fn with_platform(config: &Config, platform: Box<dyn Platform>) -> Result<Self> {
        if !platform.is_configured() {
            return Err(ConfigError::MissingField(format!(
                "{} credentials",
                platform.name()
            ))
            .into());
        }

        let client = build_http_client(&config.http)?;
        let source = InsightsClient::from_config(client, &config.source)?;
        let layout = CacheLayout::new(config.cache_dir()?, config.cache.environment);
        info!(
            "Using {:?} cache in {}",
            layout.namespace(),
            layout.dir().display()
        );

        Ok(Self::new(
            Box::new(source),
            Box::new(BackgroundRenderer::new()),
            platform,
            &layout,
            PipelineSettings::from_config(config),
        ))
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn store(&self) -> &ProcessedStore {
        &self.store
    }

    /// Run one batch to completion
    ///
    /// # Errors
    ///
    /// Fails before anything is posted when the batch cannot be fetched or
    /// the platform rejects the credentials during the pre-batch probe.
    /// Rate limits and per-item failures are reported in the [`RunReport`].
    pub async fn run(&mut self, now: DateTime<Utc>) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, platform = self.platform.name());
        self.run_batch(now, run_id).instrument(span).await
    }

    async fn run_batch(&mut self, now: DateTime<Utc>, run_id: Uuid) -> Result<RunReport> {
        let mut report = RunReport::new(run_id);

        self.enter(Stage::Fetching);
        let items = self
            .source
            .fetch_latest_items(self.settings.fetch_limit)
            .await?;
        report.fetched = items.len();

        self.enter(Stage::Filtering);
        let eligible = self.filter.eligible(items, now);
        report.eligible = eligible.len();

        let mut pending = Vec::with_capacity(eligible.len());
        for item in eligible {
            if self.store.contains(&item.id) {
                debug!("Skipping item {}: already processed", item.id);
                report.skipped.push(item.id);
            } else {
                pending.push(item);
            }
        }
        info!(
            "Fetched {} items, {} eligible, {} new",
            report.fetched,
            report.eligible,
            pending.len()
        );

        if pending.is_empty() {
            info!("Nothing to post");
            return Ok(self.finish(report, RunStatus::Done));
        }

        self.enter(Stage::RateLimitCheck);
        let verdict = self
            .guard
            .check_before_batch(self.platform.as_ref(), now)
            .await?;
        if !verdict.can_post {
            return match (verdict.source, verdict.record) {
                (VerdictSource::Cache, Some(record)) => {
                    warn!(
                        "HALTED by recorded cooldown, {} item(s) waiting: {}",
                        pending.len(),
                        verdict.reason
                    );
                    report.rate_limit = Some(record);
                    Ok(self.finish(report, RunStatus::Halted))
                }
                (_, Some(record)) => {
                    error!("HALTED before dispatch: {}", verdict.reason);
                    report.rate_limit = Some(record);
                    Ok(self.finish(report, RunStatus::Halted))
                }
                (_, None) => Err(PlatformError::Authentication(verdict.reason).into()),
            };
        }

        let marker = self.markers.load();
        let total = pending.len();
        for (index, item) in pending.iter().enumerate() {
            self.enter(Stage::Dispatching);

            if self.store.contains(&item.id) {
                debug!("Skipping item {}: repeated in batch", item.id);
                report.skipped.push(item.id.clone());
                continue;
            }
            if check_marker(marker.as_ref(), item) == MarkerCheck::OlderThanMarker {
                warn!(
                    "Item {} predates the latest sent item but is not in the processed cache; posting it",
                    item.id
                );
            }

            match self.dispatch(item).await {
                Ok(receipt) => {
                    self.enter(Stage::Updating);
                    self.record_success(item, &receipt);
                    info!(
                        "Sent item {} to {} via {} attempt",
                        item.id, receipt.platform, receipt.attempt
                    );
                    report.sent.push(item.id.clone());

                    if index + 1 < total && !self.settings.post_delay.is_zero() {
                        sleep(self.settings.post_delay).await;
                    }
                }
                Err(e) if e.is_rate_limited() => {
                    report.rate_limit = self.persist_rate_limit(&e);
                    report.halted_on = Some(item.id.clone());
                    error!(
                        "HALTED on item {}: {} ({} of {} items not attempted)",
                        item.id,
                        e,
                        total - index - 1,
                        total
                    );
                    return Ok(self.finish(report, RunStatus::Halted));
                }
                Err(e) => {
                    error!("Failed to send item {}: {}", item.id, e);
                    report.failed.push(item.id.clone());
                }
            }
        }

        info!(
            "Run complete: {} sent, {} skipped, {} failed",
            report.sent.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(self.finish(report, RunStatus::Done))
    }

    /// Render an item and walk the platform's attempt chain
    async fn dispatch(&self, item: &Item) -> Result<PostReceipt> {
        let content = self.renderer.render(item).await?;
        let attempts: Vec<Attempt> = self
            .platform
            .attempts(&content)
            .into_iter()
            .take(self.settings.max_attempts)
            .collect();

        let mut last_error: Option<InsightcastError> = None;
        for attempt in &attempts {
            let limit = self.platform.character_limit(attempt.include_media);
            let message = OutgoingMessage::compose(item, limit)?;

            match self.platform.send(attempt, &message, &content).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_rate_limited() => return Err(e),
                Err(e) => {
                    warn!(
                        "Item {}: {} attempt on {} failed: {}",
                        item.id,
                        attempt.label,
                        self.platform.name(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PlatformError::NotImplemented(format!(
                "{} has no way to post {} content",
                self.platform.name(),
                content.kind()
            ))
            .into()
        }))
    }

    fn record_success(&mut self, item: &Item, receipt: &PostReceipt) {
        let now = Utc::now();
        if let Err(e) = self.store.append(ProcessedRecord::sent(item, receipt, now)) {
            error!(
                "Item {} was sent but the processed cache could not be saved: {}",
                item.id, e
            );
        }
        if let Some(marker) = LatestMarker::for_item(item, now) {
            if let Err(e) = self.markers.save(&marker) {
                error!("Failed to update latest-item marker after {}: {}", item.id, e);
            }
        }
    }

    fn persist_rate_limit(&self, error: &InsightcastError) -> Option<RateLimitRecord> {
        match self.guard.record_failure(error, Utc::now()) {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to persist rate-limit record: {}", e);
                None
            }
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!("Pipeline stage: {:?}", stage);
        self.stage = stage;
    }

    fn finish(&mut self, mut report: RunReport, status: RunStatus) -> RunReport {
        let stage = if status == RunStatus::Halted {
            Stage::Halted
        } else {
            Stage::Done
        };
        self.enter(stage);
        report.status = status;
        report.stage = stage;
        report
    }
}
