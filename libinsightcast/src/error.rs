//! Error types for Insightcast

use thiserror::Error;

use crate::types::RateLimitSignal;

pub type Result<T> = std::result::Result<T, InsightcastError>;

#[derive(Error, Debug)]
pub enum InsightcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl InsightcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            InsightcastError::InvalidInput(_) => 3,
            InsightcastError::Config(_) => 2,
            InsightcastError::Platform(PlatformError::RateLimit(_)) => 4,
            InsightcastError::Platform(_) => 1,
            InsightcastError::Cache(_) => 1,
            InsightcastError::Source(_) => 1,
        }
    }

    /// The quota-exhaustion signal carried by this error, if any
    pub fn rate_limit_signal(&self) -> Option<&RateLimitSignal> {
        match self {
            InsightcastError::Platform(PlatformError::RateLimit(signal)) => Some(signal),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limit_signal().is_some()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(RateLimitSignal),

    #[error("Not supported: {0}")]
    NotImplemented(String),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Request to insights API failed: {0}")]
    Request(String),

    #[error("Insights API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode insights response: {0}")]
    Decode(String),
}
