//! Logging setup shared by the Insightcast binaries
//!
//! Everything goes to stderr so that stdout stays free for command output.
//! Three formats are supported: plain text for cron mail, JSON lines for log
//! shippers, and a colored pretty format for local debugging.
//!
//! # Examples
//!
//! ```no_run
//! use libinsightcast::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//!
//! // Or honour INSIGHTCAST_LOG_FORMAT / INSIGHTCAST_LOG_LEVEL
//! libinsightcast::logging::init_default();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the output format
pub const FORMAT_ENV: &str = "INSIGHTCAST_LOG_FORMAT";

/// Environment variable holding the filter directive
pub const LEVEL_ENV: &str = "INSIGHTCAST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for piping)
    #[default]
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
    /// Pretty-printed with colors (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive, e.g. "info" or "libinsightcast=debug,reqwest=warn"
    pub level: String,
    /// Forces debug level regardless of `level`
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Settings from the environment, with command-line values taking precedence
    ///
    /// An unparsable `INSIGHTCAST_LOG_FORMAT` falls back to text.
    pub fn from_env(format: Option<LogFormat>, verbose: bool) -> Self {
        let format = format.unwrap_or_else(|| {
            std::env::var(FORMAT_ENV)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default()
        });
        let level = std::env::var(LEVEL_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());
        Self::new(format, level, verbose)
    }

    /// Filter directive actually applied
    pub fn directive(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.level
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_new(self.directive()).unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Install the global subscriber
    ///
    /// Does nothing if a subscriber is already installed.
    pub fn init(&self) {
        let filter = self.filter();

        let result = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .flatten_event(true)
                .with_current_span(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .with_level(true)
                .try_init(),
        };

        if let Err(e) = result {
            eprintln!("Logging already initialized: {}", e);
        }
    }
}

/// Initialize logging from `INSIGHTCAST_LOG_FORMAT` and `INSIGHTCAST_LOG_LEVEL`
pub fn init_default() {
    LoggingConfig::from_env(None, false).init();
}
