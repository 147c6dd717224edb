//! insight-send - Post new insights once and exit
//!
//! Meant to be run from cron or a systemd timer. Each invocation handles one
//! batch and exits with a code describing how the run ended.

use clap::Parser;
use libinsightcast::logging::{LogFormat, LoggingConfig};
use libinsightcast::{CacheNamespace, Config, InsightcastError, Pipeline, Result, RunReport, RunStatus};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "insight-send")]
#[command(version)]
#[command(about = "Post new insights to Telegram or X")]
#[command(long_about = "\
insight-send - Post new insights to Telegram or X

DESCRIPTION:
    insight-send fetches the latest items from the insights API, keeps the
    ones old enough to publish, and posts every item not yet in the processed
    cache, oldest first. It runs one batch and exits.

    When the platform reports a rate limit the cooldown is written to the
    cache and the run stops. Later runs stop before posting, without any
    network call to the platform, until the quota resets.

USAGE:
    # Normal run (from cron)
    insight-send

    # Use an isolated test cache
    insight-send --test --verbose

    # Machine-readable run report on stdout
    insight-send --format json

CONFIGURATION:
    Configuration file: ~/.config/insightcast/config.toml
    Cache directory:    ~/.local/share/insightcast

    Override with environment variables:
        INSIGHTCAST_CONFIG      - Path to config file
        INSIGHTCAST_LOG_FORMAT  - text, json or pretty
        INSIGHTCAST_LOG_LEVEL   - Log filter (e.g. info, debug)

EXIT CODES:
    0 - Done (including nothing to post)
    1 - Runtime error (fetch failed, credentials rejected)
    2 - Configuration error
    3 - Invalid input
    4 - Halted on a platform rate limit (fresh, or a recorded cooldown)
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Use the isolated test cache namespace
    #[arg(long)]
    test: bool,

    /// Output format for the run report: text or json
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Log format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.log_format, cli.verbose).init();

    match run(&cli).await {
        Ok(report) => std::process::exit(report.exit_code()),
        Err(e) => {
            error!("Run failed: {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: &Cli) -> Result<RunReport> {
    if cli.format != "text" && cli.format != "json" {
        return Err(InsightcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            cli.format
        )));
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if cli.test {
        config.cache.environment = CacheNamespace::Test;
    }
    config.validate()?;

    info!(
        "insight-send starting (platform: {}, cache: {:?})",
        config.pipeline.platform, config.cache.environment
    );

    let mut pipeline = Pipeline::from_config(&config)?;
    let report = pipeline.run(chrono::Utc::now()).await?;

    if cli.format == "json" {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| InsightcastError::InvalidInput(format!("cannot encode report: {}", e)))?;
        println!("{}", json);
    } else {
        print_text_report(&report);
    }

    Ok(report)
}

fn print_text_report(report: &RunReport) {
    match report.status {
        RunStatus::Done => println!(
            "done: {} sent, {} skipped, {} failed",
            report.sent.len(),
            report.skipped.len(),
            report.failed.len()
        ),
        RunStatus::Halted if report.halted_on.is_none() && report.sent.is_empty() => println!(
            "HALTED: rate limit cooldown active until {}",
            reset_time(report)
        ),
        RunStatus::Halted => println!(
            "HALTED: rate limited{} after {} sent; next run may post after {}",
            report
                .halted_on
                .as_ref()
                .map(|id| format!(" on item {}", id))
                .unwrap_or_default(),
            report.sent.len(),
            reset_time(report)
        ),
    }
    for id in &report.sent {
        println!("sent {}", id);
    }
    for id in &report.failed {
        println!("failed {}", id);
    }
}

fn reset_time(report: &RunReport) -> String {
    report
        .rate_limit
        .as_ref()
        .and_then(|r| chrono::DateTime::from_timestamp(r.reset_timestamp, 0))
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}
