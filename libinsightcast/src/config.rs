//! Configuration management for Insightcast
//!
//! The configuration is read once at startup and handed to each component
//! constructor. Nothing below this module reads the environment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cache::CacheNamespace;
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub telegram: Option<TelegramConfig>,
    pub x: Option<XConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Endpoint returning the latest items, newest first
    pub url: String,
    /// File holding the API key, sent as a bearer token when present
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    #[serde(default = "default_max_processed_ids")]
    pub max_processed_ids: usize,
    #[serde(default)]
    pub environment: CacheNamespace,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_processed_ids: default_max_processed_ids(),
            environment: CacheNamespace::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub platform: PlatformKind,
    #[serde(default = "default_minimum_age_minutes")]
    pub minimum_age_minutes: i64,
    /// Pause after every successful post
    #[serde(default = "default_post_delay_ms")]
    pub post_delay_ms: u64,
    /// Upper bound on fallback attempts per item
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_true")]
    pub rate_limit_check: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            platform: PlatformKind::default(),
            minimum_age_minutes: default_minimum_age_minutes(),
            post_delay_ms: default_post_delay_ms(),
            max_attempts: default_max_attempts(),
            rate_limit_check: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token_file: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
    #[serde(default = "default_true")]
    pub disable_link_preview: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XConfig {
    /// OAuth 2.0 user-context token of the main account
    pub bearer_token_file: String,
    /// Optional second account tried when the first one is rejected
    #[serde(default)]
    pub secondary_bearer_token_file: Option<String>,
    #[serde(default = "default_x_api")]
    pub api_base: String,
}

/// Output channel selected for a run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    #[default]
    Telegram,
    X,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Telegram => "telegram",
            PlatformKind::X => "x",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_fetch_limit() -> usize {
    10
}

fn default_cache_dir() -> String {
    "~/.local/share/insightcast".to_string()
}

fn default_max_processed_ids() -> usize {
    200
}

/// Largest accepted `pipeline.minimum_age_minutes` (one year)
pub const MAX_MINIMUM_AGE_MINUTES: i64 = 365 * 24 * 60;

fn default_minimum_age_minutes() -> i64 {
    10
}

fn default_post_delay_ms() -> u64 {
    1000
}

fn default_max_attempts() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("insightcast/{}", env!("CARGO_PKG_VERSION"))
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_x_api() -> String {
    "https://api.x.com".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Check the settings the selected platform needs
    ///
    /// Runs before anything touches the network or the cache.
    pub fn validate(&self) -> Result<()> {
        let source_url = self.source.url.trim();
        if source_url.is_empty() {
            return Err(ConfigError::MissingField("source.url".to_string()).into());
        }
        if !(source_url.starts_with("http://") || source_url.starts_with("https://")) {
            return Err(invalid("source.url", "must be an http(s) URL"));
        }
        if self.source.fetch_limit == 0 {
            return Err(invalid("source.fetch_limit", "must be greater than zero"));
        }
        // Every fetched id must still be in the store when it comes back
        // upstream, otherwise eviction could reopen it for posting.
        if self.cache.max_processed_ids < self.source.fetch_limit {
            return Err(invalid(
                "cache.max_processed_ids",
                &format!(
                    "must be at least source.fetch_limit ({})",
                    self.source.fetch_limit
                ),
            ));
        }
        if self.pipeline.max_attempts == 0 {
            return Err(invalid("pipeline.max_attempts", "must be at least 1"));
        }
        if self.pipeline.minimum_age_minutes < 0 {
            return Err(invalid("pipeline.minimum_age_minutes", "must not be negative"));
        }
        if self.pipeline.minimum_age_minutes > MAX_MINIMUM_AGE_MINUTES {
            return Err(invalid(
                "pipeline.minimum_age_minutes",
                &format!("must be at most {}", MAX_MINIMUM_AGE_MINUTES),
            ));
        }

        match self.pipeline.platform {
            PlatformKind::Telegram => {
                let telegram = self
                    .telegram
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingField("telegram".to_string()))?;
                if telegram.chat_id.trim().is_empty() {
                    return Err(ConfigError::MissingField("telegram.chat_id".to_string()).into());
                }
                if telegram.bot_token_file.trim().is_empty() {
                    return Err(
                        ConfigError::MissingField("telegram.bot_token_file".to_string()).into(),
                    );
                }
            }
            PlatformKind::X => {
                let x = self
                    .x
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingField("x".to_string()))?;
                if x.bearer_token_file.trim().is_empty() {
                    return Err(ConfigError::MissingField("x.bearer_token_file".to_string()).into());
                }
            }
        }

        Ok(())
    }

    /// Cache directory with `~` and variables expanded
    pub fn cache_dir(&self) -> Result<PathBuf> {
        expand_path(&self.cache.dir, "cache.dir")
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::InsightcastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn expand_path(raw: &str, field: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Read a credential file, trimming surrounding whitespace
///
/// A missing, unreadable, or empty file is a configuration error.
pub fn read_secret(path: &str, field: &str) -> Result<String> {
    let resolved = expand_path(path, field)?;
    let secret = std::fs::read_to_string(&resolved)
        .map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("cannot read {}: {}", resolved.display(), e),
        })?
        .trim()
        .to_string();

    if secret.is_empty() {
        return Err(invalid(field, &format!("{} is empty", resolved.display())));
    }
    Ok(secret)
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("INSIGHTCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("insightcast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[source]
url = "https://insights.example.com/v1/latest"

[telegram]
bot_token_file = "/tmp/bot.token"
chat_id = "@insights"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.source.fetch_limit, 10);
        assert_eq!(config.cache.max_processed_ids, 200);
        assert_eq!(config.cache.environment, CacheNamespace::Production);
        assert_eq!(config.pipeline.platform, PlatformKind::Telegram);
        assert_eq!(config.pipeline.minimum_age_minutes, 10);
        assert_eq!(config.pipeline.post_delay_ms, 1000);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert!(config.pipeline.rate_limit_check);
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(
            config.telegram.as_ref().unwrap().api_base,
            "https://api.telegram.org"
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_full_x_config() {
        let config = Config::from_toml(
            r#"
[source]
url = "https://insights.example.com/v1/latest"
api_key_file = "~/.config/insightcast/source.key"
fetch_limit = 25

[cache]
dir = "/var/lib/insightcast"
max_processed_ids = 500
environment = "test"

[pipeline]
platform = "x"
minimum_age_minutes = 30
post_delay_ms = 2500
max_attempts = 2
rate_limit_check = false

[x]
bearer_token_file = "/etc/insightcast/x.token"
secondary_bearer_token_file = "/etc/insightcast/x-backup.token"
"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.pipeline.platform, PlatformKind::X);
        assert_eq!(config.cache.environment, CacheNamespace::Test);
        assert_eq!(config.x.as_ref().unwrap().api_base, "https://api.x.com");
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/var/lib/insightcast"));
    }

    #[test]
    fn test_validate_requires_selected_platform_section() {
        let config = Config::from_toml(
            r#"
[source]
url = "https://insights.example.com/v1/latest"

[pipeline]
platform = "x"
"#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("Missing required field: x"));
    }

    #[test]
    fn test_validate_rejects_store_smaller_than_fetch_window() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.source.fetch_limit = 50;
        config.cache.max_processed_ids = 20;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache.max_processed_ids"));
    }

    #[test]
    fn test_validate_bounds_minimum_age() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.pipeline.minimum_age_minutes = MAX_MINIMUM_AGE_MINUTES;
        assert!(config.validate().is_ok());

        config.pipeline.minimum_age_minutes = 200_000_000_000_000;
        let err = config.validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("pipeline.minimum_age_minutes"));
    }

    #[test]
    fn test_validate_rejects_blank_chat_and_bad_url() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.telegram.as_mut().unwrap().chat_id = "  ".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("telegram.chat_id"));

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.source.url = "ftp://insights.example.com".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("source.url"));
    }

    #[test]
    fn test_read_secret_trims_and_rejects_empty() {
        let temp = TempDir::new().unwrap();
        let token = temp.path().join("bot.token");
        std::fs::write(&token, "  123:abc\n").unwrap();
        assert_eq!(
            read_secret(token.to_str().unwrap(), "telegram.bot_token_file").unwrap(),
            "123:abc"
        );

        let empty = temp.path().join("empty.token");
        std::fs::write(&empty, "\n").unwrap();
        let err = read_secret(empty.to_str().unwrap(), "x.bearer_token_file").unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let missing = temp.path().join("missing.token");
        let err = read_secret(missing.to_str().unwrap(), "x.bearer_token_file").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn test_load_from_path_reports_parse_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[source\nurl = ").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_honours_env() {
        std::env::set_var("INSIGHTCAST_CONFIG", "/tmp/insightcast-test.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("INSIGHTCAST_CONFIG");

        assert_eq!(path, PathBuf::from("/tmp/insightcast-test.toml"));
    }
}
