//! Integration tests for insight-cache list

mod common;

use common::{setup_test_env, BATCH};
use predicates::prelude::*;

#[test]
fn test_list_empty_cache_prints_nothing() {
    let env = setup_test_env();

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_list_text_is_newest_first() {
    let env = setup_test_env();
    let batch = env.write_batch("latest.json", BATCH);
    env.cmd().arg("seed").arg("--from-file").arg(&batch).assert().success();

    let output = env.cmd().arg("list").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let ids: Vec<&str> = stdout
        .lines()
        .map(|line| line.split(" | ").next().unwrap())
        .collect();
    assert_eq!(ids, vec!["c", "2", "a"]);
    assert!(stdout.lines().all(|line| line.contains(" | seed | ")));
}

#[test]
fn test_list_json_respects_limit() {
    let env = setup_test_env();
    let batch = env.write_batch("latest.json", BATCH);
    env.cmd().arg("seed").arg("--from-file").arg(&batch).assert().success();

    let output = env
        .cmd()
        .args(["list", "--limit", "1", "--format", "json"])
        .output()
        .unwrap();
    let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], "c");
    assert_eq!(records[0]["metadata"]["publishedAt"], "2024-05-01T12:00:00Z");
}

#[test]
fn test_list_invalid_format_exits_3() {
    let env = setup_test_env();

    env.cmd()
        .args(["list", "--format", "csv"])
        .assert()
        .failure()
        .code(3);
}

#[test]
fn test_inspection_leaves_legacy_cache_untouched() {
    let env = setup_test_env();
    std::fs::create_dir_all(&env.cache_dir).unwrap();
    let raw = r#"["old-1", "old-2"]"#;
    std::fs::write(env.cache_file("processed_items.json"), raw).unwrap();

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("old-2 | legacy"));
    env.cmd()
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Processed:  2 / 50"));

    assert_eq!(
        std::fs::read_to_string(env.cache_file("processed_items.json")).unwrap(),
        raw
    );
}
