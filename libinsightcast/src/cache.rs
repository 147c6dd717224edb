//! On-disk cache layout and JSON persistence helpers
//!
//! Three files live in the cache directory, each prefixed by the namespace:
//! the processed-item list, the latest-sent marker, and the rate-limit
//! record. Writes go to a sibling temp file that is synced and renamed over
//! the target, so a crash never leaves a half-written cache behind.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{CacheError, Result};
use crate::types::LatestMarker;

const PROCESSED_FILE: &str = "processed_items.json";
const MARKER_FILE: &str = "latest_item.json";
const RATE_LIMIT_FILE: &str = "rate_limit.json";

/// Isolates test runs from production state
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheNamespace {
    #[default]
    Production,
    Test,
}

impl CacheNamespace {
    pub fn file_prefix(&self) -> &'static str {
        match self {
            CacheNamespace::Production => "",
            CacheNamespace::Test => "test_",
        }
    }
}

/// Paths of every cache file for one namespace
#[derive(Debug, Clone)]
pub struct CacheLayout {
    dir: PathBuf,
    namespace: CacheNamespace,
}

impl CacheLayout {
    pub fn new(dir: impl Into<PathBuf>, namespace: CacheNamespace) -> Self {
        Self {
            dir: dir.into(),
            namespace,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn namespace(&self) -> CacheNamespace {
        self.namespace
    }

    pub fn processed_path(&self) -> PathBuf {
        self.file(PROCESSED_FILE)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.file(MARKER_FILE)
    }

    pub fn rate_limit_path(&self) -> PathBuf {
        self.file(RATE_LIMIT_FILE)
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", self.namespace.file_prefix(), name))
    }
}

/// Read and decode a JSON file; `Ok(None)` when it does not exist or is empty
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::Io(e).into()),
    };
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    let value = serde_json::from_slice(&bytes).map_err(CacheError::Serialize)?;
    Ok(Some(value))
}

/// Serialize `value` and atomically replace `path` with it
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(CacheError::Io)?;
    }

    let bytes = serde_json::to_vec_pretty(value).map_err(CacheError::Serialize)?;
    let tmp_path = temp_sibling(path);

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp_path);
        return Err(CacheError::Io(e).into());
    }
    Ok(())
}

/// Delete a cache file; returns whether anything was removed
pub fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::Io(e).into()),
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Latest-sent marker persistence
#[derive(Debug, Clone)]
pub struct MarkerStore {
    path: PathBuf,
}

impl MarkerStore {
    pub fn new(layout: &CacheLayout) -> Self {
        Self {
            path: layout.marker_path(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the marker, treating unreadable files as absent
    pub fn load(&self) -> Option<LatestMarker> {
        match read_json::<LatestMarker>(&self.path) {
            Ok(marker) => marker,
            Err(e) => {
                warn!(
                    "Ignoring unreadable latest-item marker {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Overwrite the marker wholesale
    pub fn save(&self, marker: &LatestMarker) -> Result<()> {
        write_json_atomic(&self.path, marker)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MaybeWrapped<T> {
    Wrapped { items: Vec<T> },
    Bare(Vec<T>),
}

impl<T> MaybeWrapped<T> {
    pub(crate) fn into_items(self) -> Vec<T> {
        match self {
            MaybeWrapped::Wrapped { items } => items,
            MaybeWrapped::Bare(items) => items,
        }
    }
}
