//! Integration tests for insight-cache stats and clear-rate-limit

mod common;

use chrono::{Duration, Utc};
use common::{setup_test_env, BATCH};
use predicates::prelude::*;
use std::fs;

fn write_rate_limit(env: &common::TestEnv, file: &str, reset_in: Duration) {
    fs::create_dir_all(&env.cache_dir).unwrap();
    let record = serde_json::json!({
        "limitType": "user_daily",
        "resetTimestamp": (Utc::now() + reset_in).timestamp(),
        "details": "HTTP 429 Too Many Requests",
        "detectedAt": Utc::now().to_rfc3339(),
    });
    fs::write(env.cache_file(file), record.to_string()).unwrap();
}

#[test]
fn test_stats_on_empty_cache() {
    let env = setup_test_env();

    env.cmd()
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Processed:  0 / 50"))
        .stdout(predicate::str::contains("Rate limit: absent"));
}

#[test]
fn test_stats_json_after_seed() {
    let env = setup_test_env();
    let batch = env.write_batch("latest.json", BATCH);
    env.cmd().arg("seed").arg("--from-file").arg(&batch).assert().success();

    let output = env
        .cmd()
        .args(["stats", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["namespace"], "production");
    assert_eq!(stats["processed"], 3);
    assert_eq!(stats["maxEntries"], 50);
    assert_eq!(stats["byPlatform"]["seed"], 3);
    assert_eq!(stats["rateLimit"]["status"], "absent");
}

#[test]
fn test_stats_reports_active_rate_limit() {
    let env = setup_test_env();
    write_rate_limit(&env, "rate_limit.json", Duration::hours(2));

    let output = env
        .cmd()
        .args(["stats", "--format", "json"])
        .output()
        .unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["rateLimit"]["status"], "active");
    assert_eq!(stats["rateLimit"]["record"]["limitType"], "user_daily");
    assert!(stats["rateLimit"]["remainingSecs"].as_u64().unwrap() > 3600);
}

#[test]
fn test_stats_invalid_format_exits_3() {
    let env = setup_test_env();

    env.cmd()
        .args(["stats", "--format", "xml"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Invalid format 'xml'"));
}

#[test]
fn test_clear_rate_limit_removes_record() {
    let env = setup_test_env();
    write_rate_limit(&env, "rate_limit.json", Duration::hours(1));

    env.cmd()
        .arg("clear-rate-limit")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared rate limit: user_daily limit until"));
    assert!(!env.cache_file("rate_limit.json").exists());

    env.cmd()
        .arg("clear-rate-limit")
        .assert()
        .success()
        .stdout(predicate::str::contains("No rate limit recorded"));
}

#[test]
fn test_clear_rate_limit_respects_namespace() {
    let env = setup_test_env();
    write_rate_limit(&env, "rate_limit.json", Duration::hours(1));
    write_rate_limit(&env, "test_rate_limit.json", Duration::hours(1));

    env.cmd()
        .args(["--test", "clear-rate-limit"])
        .assert()
        .success();

    assert!(!env.cache_file("test_rate_limit.json").exists());
    assert!(env.cache_file("rate_limit.json").exists());
}
