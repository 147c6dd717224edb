//! Platform abstraction and implementations
//!
//! Every output channel implements [`Platform`]. A platform describes its own
//! fallback chain as an ordered list of [`Attempt`]s; the dispatch pipeline
//! walks that list and decides after each failure whether to move on to the
//! next attempt or to stop the run.
//!
//! # Examples
//!
//! ```no_run
//! use libinsightcast::platforms::{create_platform, Platform};
//! use libinsightcast::types::{Item, OutgoingMessage, RenderedContent};
//! use libinsightcast::Config;
//!
//! # async fn example() -> libinsightcast::error::Result<()> {
//! let config = Config::load()?;
//! let platform = create_platform(&config)?;
//!
//! let item = Item::new("42", chrono::Utc::now(), "Rates unchanged");
//! let content = RenderedContent::TextOnly;
//! for attempt in platform.attempts(&content) {
//!     let limit = platform.character_limit(attempt.include_media);
//!     let message = OutgoingMessage::compose(&item, limit)?;
//!     if platform.send(&attempt, &message, &content).await.is_ok() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::time::Duration;

use crate::config::{read_secret, Config, HttpConfig, PlatformKind};
use crate::error::{ConfigError, PlatformError, Result};
use crate::rate_limiter::QuotaStatus;
use crate::types::{OutgoingMessage, PostReceipt, RenderedContent};

pub mod telegram;
pub mod x;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// One step of a platform's fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Short label recorded with the processed item (e.g. "photo", "text")
    pub label: String,
    /// Index of the account/credential set to use
    pub account: usize,
    /// Whether the rendered image is sent with this attempt
    pub include_media: bool,
}

impl Attempt {
    pub fn new(label: impl Into<String>, account: usize, include_media: bool) -> Self {
        Self {
            label: label.into(),
            account,
            include_media,
        }
    }
}

/// Outcome of a lightweight live check against the platform
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    /// False when the platform offers no probe; nothing was sent
    pub supported: bool,
    /// Account name or id confirmed by the probe
    pub identity: Option<String>,
    /// Quota readings taken from the probe response
    pub quotas: Vec<QuotaStatus>,
}

impl ProbeReport {
    pub fn unsupported() -> Self {
        Self::default()
    }
}

/// Platform trait for posting one item at a time
#[async_trait]
pub trait Platform: Send + Sync {
    /// Lowercase identifier recorded in the cache ("telegram", "x")
    fn name(&self) -> &str;

    /// Whether credentials and targets are present
    fn is_configured(&self) -> bool;

    /// Maximum text length for an attempt, `None` for no hard limit
    fn character_limit(&self, with_media: bool) -> Option<usize>;

    /// Ordered fallback chain for the given rendered content
    fn attempts(&self, content: &RenderedContent) -> Vec<Attempt>;

    /// Perform one attempt
    ///
    /// # Errors
    ///
    /// - `PlatformError::RateLimit` when the platform reports quota exhaustion
    /// - `PlatformError::Authentication` when the credentials are rejected
    /// - `PlatformError::Network` for transport failures and timeouts
    /// - `PlatformError::Posting` for any other rejection
    async fn send(
        &self,
        attempt: &Attempt,
        message: &OutgoingMessage,
        content: &RenderedContent,
    ) -> Result<PostReceipt>;

    /// Identity and quota check used before a batch starts
    async fn probe(&self) -> Result<ProbeReport> {
        Ok(ProbeReport::unsupported())
    }

    /// Check message text before sending it
    fn validate_content(&self, text: &str, with_media: bool) -> Result<()> {
        if text.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }
        if let Some(limit) = self.character_limit(with_media) {
            let length = text.chars().count();
            if length > limit {
                return Err(PlatformError::Validation(format!(
                    "Content exceeds {}'s {} character limit (current: {} characters)",
                    self.name(),
                    limit,
                    length
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// Shared HTTP client with the configured per-call timeout
pub fn build_http_client(http: &HttpConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(http.timeout_secs))
        .user_agent(http.user_agent.clone())
        .build()
        .map_err(|e| {
            ConfigError::InvalidValue {
                field: "http".to_string(),
                reason: format!("cannot build HTTP client: {}", e),
            }
            .into()
        })
}

/// Classify a transport-level reqwest failure
///
/// The URL is stripped from the message since Bot API URLs embed the token.
pub(crate) fn map_transport_error(error: reqwest::Error, platform: &str, context: &str) -> PlatformError {
    let error = error.without_url();
    if error.is_timeout() || error.is_connect() || error.is_request() {
        PlatformError::Network(format!("{} {} failed: {}", platform, context, error))
    } else {
        PlatformError::Posting(format!("{} {} failed: {}", platform, context, error))
    }
}

/// Create the platform selected in the configuration
///
/// Reads credential files, so a missing token surfaces here as a
/// configuration error before anything is fetched.
///
/// # Errors
///
/// Returns a configuration error if the selected platform section is missing
/// or a credential file cannot be read.
pub fn create_platform(config: &Config) -> Result<Box<dyn Platform>> {
    let client = build_http_client(&config.http)?;

    match config.pipeline.platform {
        PlatformKind::Telegram => {
            let telegram = config
                .telegram
                .as_ref()
                .ok_or_else(|| ConfigError::MissingField("telegram".to_string()))?;
            let token = read_secret(&telegram.bot_token_file, "telegram.bot_token_file")?;
            Ok(Box::new(telegram::TelegramClient::new(
                client,
                telegram.clone(),
                token,
            )))
        }
        PlatformKind::X => {
            let x = config
                .x
                .as_ref()
                .ok_or_else(|| ConfigError::MissingField("x".to_string()))?;
            let mut accounts = vec![x::XAccount::new(
                "primary",
                read_secret(&x.bearer_token_file, "x.bearer_token_file")?,
            )];
            if let Some(secondary) = &x.secondary_bearer_token_file {
                accounts.push(x::XAccount::new(
                    "secondary",
                    read_secret(secondary, "x.secondary_bearer_token_file")?,
                ));
            }
            Ok(Box::new(x::XClient::new(client, x.api_base.clone(), accounts)))
        }
    }
}
