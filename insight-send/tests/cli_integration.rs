//! Integration tests for the insight-send binary
//!
//! Network-free: every run here fails before dispatch or targets a closed port.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Escape a path for use in a TOML string (Windows backslashes)
fn escape_path_for_toml(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

/// Write a Telegram config into a temp dir and return (dir, config path)
fn setup_test_env(extra: &str, write_token: bool) -> (TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let cache_dir = temp_dir.path().join("cache");
    let token_path = temp_dir.path().join("telegram.token");
    if write_token {
        fs::write(&token_path, "123456:ABCDEF\n").unwrap();
    }

    let config_content = format!(
        r#"
[source]
# Closed port: fetching fails fast with a connection error
url = "http://127.0.0.1:9/insights/latest"
fetch_limit = 5
{extra}

[cache]
dir = "{cache}"

[pipeline]
platform = "telegram"
post_delay_ms = 0

[http]
timeout_secs = 2

[telegram]
bot_token_file = "{token}"
chat_id = "@insights"
"#,
        extra = extra,
        cache = escape_path_for_toml(&cache_dir),
        token = escape_path_for_toml(&token_path),
    );

    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, config_content).unwrap();
    (temp_dir, config_path.to_str().unwrap().to_string())
}

fn insight_send() -> Command {
    let mut cmd = Command::cargo_bin("insight-send").unwrap();
    cmd.env_remove("INSIGHTCAST_CONFIG")
        .env_remove("INSIGHTCAST_LOG_FORMAT")
        .env_remove("INSIGHTCAST_LOG_LEVEL");
    cmd
}

#[test]
fn test_help_lists_exit_codes() {
    insight_send()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("EXIT CODES"))
        .stdout(predicate::str::contains("--test"));
}

#[test]
fn test_missing_config_file_exits_2() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");

    insight_send()
        .arg("--config")
        .arg(&missing)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_config_env_var_is_honoured() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("from-env.toml");

    insight_send()
        .env("INSIGHTCAST_CONFIG", &missing)
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_store_smaller_than_fetch_limit_exits_2() {
    let (temp_dir, config_path) = setup_test_env("", true);
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("[cache]", "[cache]\nmax_processed_ids = 2");
    fs::write(&config_path, content).unwrap();

    insight_send()
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("cache.max_processed_ids"));

    drop(temp_dir);
}

#[test]
fn test_missing_token_file_exits_2() {
    let (_temp_dir, config_path) = setup_test_env("", false);

    insight_send()
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("telegram.bot_token_file"));
}

#[test]
fn test_invalid_report_format_exits_3() {
    let (_temp_dir, config_path) = setup_test_env("", true);

    insight_send()
        .arg("--config")
        .arg(&config_path)
        .arg("--format")
        .arg("yaml")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));
}

#[test]
fn test_unreachable_source_exits_1_without_touching_cache() {
    let (temp_dir, config_path) = setup_test_env("", true);

    insight_send()
        .arg("--config")
        .arg(&config_path)
        .arg("--test")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Source error"));

    let cache_dir = temp_dir.path().join("cache");
    assert!(!cache_dir.join("test_processed_items.json").exists());
    assert!(!cache_dir.join("processed_items.json").exists());
}
