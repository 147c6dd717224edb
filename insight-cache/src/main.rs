//! insight-cache - Maintain the processed-item cache
//!
//! Unix-style tool for seeding, inspecting and unblocking the cache that
//! insight-send reads before every run.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use libinsightcast::logging::{LogFormat, LoggingConfig};
use libinsightcast::maintenance::{cache_stats, preseed, CacheStats};
use libinsightcast::platforms::build_http_client;
use libinsightcast::rate_limiter::{describe, RateLimitGuard};
use libinsightcast::source::{InsightsClient, ItemSource, StaticSource};
use libinsightcast::{CacheLayout, CacheNamespace, Config, InsightcastError, ProcessedStore};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "insight-cache")]
#[command(version)]
#[command(about = "Maintain the Insightcast processed-item cache")]
#[command(long_about = "\
insight-cache - Maintain the Insightcast processed-item cache

DESCRIPTION:
    insight-cache inspects and maintains the cache insight-send uses to avoid
    double posting. Use it to pre-seed a fresh install, look at what has been
    posted, or lift a rate-limit cooldown by hand.

COMMANDS:
    seed              Mark the current remote items as processed without posting
    stats             Show cache statistics and the rate-limit state
    list              List processed items, newest first
    clear-rate-limit  Remove the persisted rate-limit record

USAGE EXAMPLES:
    # First deployment: skip everything already published upstream
    insight-cache seed

    # Seed the test namespace from a saved API response
    insight-cache --test seed --from-file latest.json

    # Cache statistics as JSON
    insight-cache stats --format json

    # The 5 most recent processed items
    insight-cache list --limit 5

CONFIGURATION:
    Configuration file: ~/.config/insightcast/config.toml
    Cache directory:    ~/.local/share/insightcast

    Override with environment variables:
        INSIGHTCAST_CONFIG  - Path to config file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Configuration error
    3 - Invalid input (bad format, unreadable seed file, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Operate on the isolated test cache namespace
    #[arg(long, global = true)]
    test: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mark current remote items as processed without posting them
    Seed {
        /// Number of items to fetch (defaults to source.fetch_limit)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Read items from a saved API response instead of the network
        #[arg(long, value_name = "PATH")]
        from_file: Option<PathBuf>,
    },

    /// Show cache statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List processed items, newest first
    List {
        /// Maximum number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove the persisted rate-limit record
    ClearRateLimit,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(LogFormat::Text, "warn".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

/// Exit code of the first library error in the chain, 1 otherwise
fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<InsightcastError>())
        .map(InsightcastError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load()?,
    };
    if cli.test {
        config.cache.environment = CacheNamespace::Test;
    }

    let layout = CacheLayout::new(config.cache_dir()?, config.cache.environment);

    match cli.command {
        Commands::Seed { limit, from_file } => cmd_seed(&config, &layout, limit, from_file).await,
        Commands::Stats { format } => cmd_stats(&config, &layout, &format),
        Commands::List { limit, format } => cmd_list(&config, &layout, limit, &format),
        Commands::ClearRateLimit => cmd_clear_rate_limit(&layout),
    }
}

fn validate_format(format: &str) -> anyhow::Result<()> {
    if format != "text" && format != "json" {
        return Err(InsightcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        ))
        .into());
    }
    Ok(())
}

/// Pre-seed the store from the API or a saved response
async fn cmd_seed(
    config: &Config,
    layout: &CacheLayout,
    limit: Option<usize>,
    from_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let limit = limit.unwrap_or(config.source.fetch_limit);
    if limit == 0 {
        return Err(InsightcastError::InvalidInput(
            "--limit must be greater than zero".to_string(),
        )
        .into());
    }
    if limit > config.cache.max_processed_ids {
        warn!(
            "Seeding {} items into a store capped at {}; the oldest will be evicted",
            limit, config.cache.max_processed_ids
        );
    }

    let source: Box<dyn ItemSource> = match &from_file {
        Some(path) => Box::new(StaticSource::from_file(path)?),
        None => {
            let client = build_http_client(&config.http)?;
            Box::new(InsightsClient::from_config(client, &config.source)?)
        }
    };

    let mut store = ProcessedStore::open(layout, config.cache.max_processed_ids);
    let report = preseed(source.as_ref(), &mut store, limit, Utc::now())
        .await
        .context("pre-seeding the processed-item cache")?;

    info!("Seed finished: {:?}", report);
    println!(
        "Seeded {} new item(s) ({} already present, {} fetched); {} entries in {}",
        report.added,
        report.already_present,
        report.fetched,
        report.total,
        store.path().display()
    );
    Ok(())
}

/// Show cache statistics
fn cmd_stats(config: &Config, layout: &CacheLayout, format: &str) -> anyhow::Result<()> {
    validate_format(format)?;

    let now = Utc::now();
    let store = ProcessedStore::open_read_only(layout, config.cache.max_processed_ids);
    let stats = cache_stats(layout, &store, now);

    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("encoding cache statistics")?
        );
    } else {
        output_stats_text(&stats, now);
    }
    Ok(())
}

fn output_stats_text(stats: &CacheStats, now: DateTime<Utc>) {
    println!("Namespace:  {:?}", stats.namespace);
    println!("Directory:  {}", stats.dir.display());
    println!("Processed:  {} / {}", stats.processed, stats.max_entries);

    if let (Some(oldest), Some(newest)) = (stats.oldest_processed_at, stats.newest_processed_at) {
        println!(
            "Window:     {} .. {} ({} ago)",
            oldest.to_rfc3339(),
            newest.to_rfc3339(),
            format_age(now, newest)
        );
    }
    for (platform, count) in &stats.by_platform {
        println!("  {:<10} {}", platform, count);
    }

    match &stats.latest {
        Some(marker) => println!(
            "Latest:     {} (published {}, sent {})",
            marker.id,
            marker.published_at.to_rfc3339(),
            marker.sent_at.to_rfc3339()
        ),
        None => println!("Latest:     none"),
    }

    match &stats.rate_limit.record {
        Some(record) => println!(
            "Rate limit: {} - {}",
            stats.rate_limit.status,
            describe(record, now)
        ),
        None => println!("Rate limit: {}", stats.rate_limit.status),
    }
}

/// List processed items
fn cmd_list(config: &Config, layout: &CacheLayout, limit: usize, format: &str) -> anyhow::Result<()> {
    validate_format(format)?;

    let store = ProcessedStore::open_read_only(layout, config.cache.max_processed_ids);
    let records: Vec<_> = store.records().rev().take(limit).collect();

    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&records).context("encoding processed records")?
        );
        return Ok(());
    }

    let now = Utc::now();
    for record in records {
        let link = record
            .platform_response
            .as_ref()
            .and_then(|r| r.post_url.as_deref())
            .unwrap_or("-");
        println!(
            "{} | {} | {} ago | {}",
            record.id,
            record.platform,
            format_age(now, record.processed_at),
            link
        );
    }
    Ok(())
}

/// Remove the rate-limit record so the next run probes again
fn cmd_clear_rate_limit(layout: &CacheLayout) -> anyhow::Result<()> {
    let guard = RateLimitGuard::new(layout);
    let previous = guard.load();

    if guard.clear()? {
        match previous {
            Some(record) => println!("Cleared rate limit: {}", describe(&record, Utc::now())),
            None => println!("Removed unreadable rate-limit file {}", guard.path().display()),
        }
    } else {
        println!("No rate limit recorded");
    }
    Ok(())
}

/// Coarse age, rounded down to whole minutes
fn format_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0) as u64;
    if secs < 60 {
        return "<1m".to_string();
    }
    humantime::format_duration(std::time::Duration::from_secs(secs - secs % 60)).to_string()
}
