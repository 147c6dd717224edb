//! Insightcast - publish insights to Telegram or X without double posting
//!
//! A run fetches the latest items from the insights API, keeps those old
//! enough to publish, and posts the ones not yet in the processed cache,
//! oldest first. Platform rate limits are persisted so later runs back off
//! until the quota resets.

pub mod cache;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod logging;
pub mod maintenance;
pub mod pipeline;
pub mod platforms;
pub mod rate_limiter;
pub mod render;
pub mod source;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheLayout, CacheNamespace};
pub use config::Config;
pub use error::{InsightcastError, Result};
pub use pipeline::{Pipeline, PipelineSettings, RunReport, RunStatus};
pub use store::ProcessedStore;
pub use types::{Item, ProcessedRecord, RateLimitRecord};
