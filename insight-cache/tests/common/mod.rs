//! Shared setup for insight-cache integration tests

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Escape a path for use in a TOML string (Windows backslashes)
pub fn escape_path_for_toml(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
    pub cache_dir: PathBuf,
}

impl TestEnv {
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("insight-cache").unwrap();
        cmd.env_remove("INSIGHTCAST_CONFIG")
            .env_remove("INSIGHTCAST_LOG_FORMAT")
            .env_remove("INSIGHTCAST_LOG_LEVEL")
            .arg("--config")
            .arg(&self.config_path);
        cmd
    }

    /// Save an API-style response for `seed --from-file`
    pub fn write_batch(&self, name: &str, json: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, json).unwrap();
        path
    }

    pub fn cache_file(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }
}

/// Config with a cache dir under a temp dir and no platform section
pub fn setup_test_env() -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let cache_dir = temp_dir.path().join("cache");
    let config_path = temp_dir.path().join("config.toml");

    let config_content = format!(
        r#"
[source]
url = "http://127.0.0.1:9/insights/latest"
fetch_limit = 10

[cache]
dir = "{}"
max_processed_ids = 50
"#,
        escape_path_for_toml(&cache_dir)
    );
    fs::write(&config_path, config_content).unwrap();

    TestEnv {
        temp_dir,
        config_path,
        cache_dir,
    }
}

/// Three items, newest first like the insights API
pub const BATCH: &str = r#"{
  "data": [
    {"id": "c", "publishedAt": "2024-05-01T12:00:00Z", "headline": "Third"},
    {"id": 2, "publishedAt": "2024-05-01T11:00:00Z", "headline": "Second"},
    {"id": "a", "publishedAt": "2024-05-01T10:00:00Z", "headline": "First",
     "background": {"type": "image", "value": "https://cdn.example.com/a.png"}}
  ]
}"#;
