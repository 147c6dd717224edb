//! Processed-item store
//!
//! The authoritative duplicate guard. The full list is loaded into memory at
//! startup, mutated there, and written back atomically after each change.
//! Entries are kept in insertion order and capped at a configured maximum;
//! the oldest insertions are evicted first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cache::{read_json, write_json_atomic, CacheLayout, MaybeWrapped};
use crate::error::Result;
use crate::types::ProcessedRecord;

/// How one on-disk entry was understood
enum Decoded {
    /// A well-formed record
    Intact(ProcessedRecord),
    /// A bare id or a partial record, upgraded to a full record
    Upgraded(ProcessedRecord),
    Unusable,
}

/// Decode one entry; anything carrying an id is kept
///
/// Bare ids from older releases and records with missing or mistyped fields
/// become legacy records stamped with `now`, keeping whatever `processedAt`
/// and `platform` survive.
fn decode_entry(entry: Value, now: DateTime<Utc>) -> Decoded {
    let map = match entry {
        Value::String(id) if !id.trim().is_empty() => {
            return Decoded::Upgraded(ProcessedRecord::legacy(id, now))
        }
        Value::Number(n) => return Decoded::Upgraded(ProcessedRecord::legacy(n.to_string(), now)),
        Value::Object(map) => map,
        _ => return Decoded::Unusable,
    };

    let id = match map.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Decoded::Unusable,
    };
    let processed_at = map
        .get("processedAt")
        .and_then(|v| DateTime::<Utc>::deserialize(v).ok());
    let platform = map.get("platform").and_then(Value::as_str).map(str::to_string);

    match serde_json::from_value::<ProcessedRecord>(Value::Object(map)) {
        Ok(record) => Decoded::Intact(record),
        Err(_) => {
            let mut record = ProcessedRecord::legacy(id, now);
            if let Some(at) = processed_at {
                record.processed_at = at;
            }
            if let Some(platform) = platform {
                record.platform = platform;
            }
            Decoded::Upgraded(record)
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredFile<'a> {
    updated_at: DateTime<Utc>,
    items: Vec<&'a ProcessedRecord>,
}

pub struct ProcessedStore {
    path: PathBuf,
    max_entries: usize,
    records: VecDeque<ProcessedRecord>,
    index: HashSet<String>,
}

impl ProcessedStore {
    /// Empty store bound to `path`; nothing is read or written
    pub fn empty(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries: max_entries.max(1),
            records: VecDeque::new(),
            index: HashSet::new(),
        }
    }

    /// Load the store for a cache layout
    pub fn open(layout: &CacheLayout, max_entries: usize) -> Self {
        Self::load(layout.processed_path(), max_entries, Utc::now())
    }

    /// Load the store for inspection; upgraded entries are not written back
    pub fn open_read_only(layout: &CacheLayout, max_entries: usize) -> Self {
        Self::read(layout.processed_path(), max_entries, Utc::now()).0
    }

    /// Load the store from disk, never failing
    ///
    /// A missing or unparsable file yields an empty store. Entries are decoded
    /// one at a time: a bad entry is skipped without losing its neighbours,
    /// and upgraded entries cause the list to be written back once.
    pub fn load(path: impl Into<PathBuf>, max_entries: usize, now: DateTime<Utc>) -> Self {
        let (store, upgraded) = Self::read(path, max_entries, now);

        if upgraded > 0 {
            info!(
                "Migrated {} legacy processed-item entries in {}",
                upgraded,
                store.path.display()
            );
            if let Err(e) = store.save() {
                warn!("Failed to persist migrated processed-item cache: {}", e);
            }
        }

        store
    }

    /// Decode the file; returns the store and the number of upgraded entries
    fn read(path: impl Into<PathBuf>, max_entries: usize, now: DateTime<Utc>) -> (Self, usize) {
        let mut store = Self::empty(path, max_entries);

        let entries = match read_json::<MaybeWrapped<Value>>(&store.path) {
            Ok(Some(file)) => file.into_items(),
            Ok(None) => {
                debug!("No processed-item cache at {}", store.path.display());
                return (store, 0);
            }
            Err(e) => {
                warn!(
                    "Processed-item cache {} is unreadable, starting empty: {}",
                    store.path.display(),
                    e
                );
                return (store, 0);
            }
        };

        let mut upgraded = 0usize;
        for (index, entry) in entries.into_iter().enumerate() {
            match decode_entry(entry, now) {
                Decoded::Intact(record) => {
                    store.insert(record);
                }
                Decoded::Upgraded(record) => {
                    upgraded += 1;
                    store.insert(record);
                }
                Decoded::Unusable => warn!(
                    "Skipping processed-item entry #{} in {}: no usable id",
                    index,
                    store.path.display()
                ),
            }
        }

        (store, upgraded)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order, oldest first
    pub fn records(&self) -> impl DoubleEndedIterator<Item = &ProcessedRecord> + ExactSizeIterator {
        self.records.iter()
    }

    /// Add a record in memory only; returns false if the id was already known
    pub fn insert(&mut self, record: ProcessedRecord) -> bool {
        if self.index.contains(&record.id) {
            return false;
        }
        self.index.insert(record.id.clone());
        self.records.push_back(record);
        self.evict_overflow();
        true
    }

    /// Add a record and persist the store
    ///
    /// Returns `Ok(false)` without touching disk when the id is already
    /// present. When the write fails the record stays in memory, so the rest
    /// of the run still treats the item as processed.
    pub fn append(&mut self, record: ProcessedRecord) -> Result<bool> {
        if !self.insert(record) {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Atomically write the newest `max_entries` records
    pub fn save(&self) -> Result<()> {
        let skip = self.records.len().saturating_sub(self.max_entries);
        let file = StoredFile {
            updated_at: Utc::now(),
            items: self.records.iter().skip(skip).collect(),
        };
        write_json_atomic(&self.path, &file)
    }

    fn evict_overflow(&mut self) {
        while self.records.len() > self.max_entries {
            if let Some(evicted) = self.records.pop_front() {
                debug!("Evicting oldest processed id {}", evicted.id);
                self.index.remove(&evicted.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheNamespace;
    use tempfile::TempDir;

    fn record(id: &str) -> ProcessedRecord {
        ProcessedRecord {
            id: id.to_string(),
            processed_at: Utc::now(),
            platform: "telegram".to_string(),
            metadata: None,
            platform_response: None,
        }
    }

    fn setup() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("processed_items.json");
        (temp, path)
    }

    #[test]
    fn test_append_is_idempotent() {
        let (_temp, path) = setup();
        let mut store = ProcessedStore::empty(&path, 10);

        assert!(store.append(record("a")).unwrap());
        let snapshot = std::fs::read_to_string(&path).unwrap();

        let mut duplicate = record("a");
        duplicate.platform = "x".to_string();
        assert!(!store.append(duplicate).unwrap());

        assert_eq!(store.len(), 1);
        assert_eq!(store.records().next().unwrap().platform, "telegram");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), snapshot);
    }

    #[test]
    fn test_eviction_keeps_most_recent_entries() {
        let (_temp, path) = setup();
        let mut store = ProcessedStore::empty(&path, 200);

        for i in 0..205 {
            store.append(record(&format!("id-{}", i))).unwrap();
        }

        assert_eq!(store.len(), 200);
        for i in 0..5 {
            assert!(!store.contains(&format!("id-{}", i)), "id-{} should be evicted", i);
        }
        for i in 5..205 {
            assert!(store.contains(&format!("id-{}", i)));
        }

        let reloaded = ProcessedStore::load(&path, 200, Utc::now());
        assert_eq!(reloaded.len(), 200);
        assert_eq!(reloaded.records().next().unwrap().id, "id-5");
        assert_eq!(reloaded.records().last().unwrap().id, "id-204");
    }

    #[test]
    fn test_evicted_id_can_be_inserted_again() {
        let (_temp, path) = setup();
        let mut store = ProcessedStore::empty(&path, 2);
        store.insert(record("a"));
        store.insert(record("b"));
        store.insert(record("c"));

        assert!(!store.contains("a"));
        assert!(store.insert(record("a")));
        assert_eq!(
            store.records().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["c", "a"]
        );
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let (_temp, path) = setup();
        let store = ProcessedStore::load(&path, 10, Utc::now());
        assert!(store.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_load_corrupt_file_fails_soft() {
        let (_temp, path) = setup();
        std::fs::write(&path, "{\"items\": [").unwrap();

        let store = ProcessedStore::load(&path, 10, Utc::now());
        assert!(store.is_empty());
    }

    #[test]
    fn test_legacy_bare_ids_are_migrated_and_rewritten() {
        let (_temp, path) = setup();
        std::fs::write(
            &path,
            r#"["old-1", {"id": "new-1", "processedAt": "2024-05-01T10:00:00Z", "platform": "x"}, "old-2"]"#,
        )
        .unwrap();

        let store = ProcessedStore::load(&path, 10, Utc::now());
        assert_eq!(store.len(), 3);
        assert!(store.contains("old-1"));
        assert!(store.contains("new-1"));

        let legacy = store.records().next().unwrap();
        assert_eq!(legacy.platform, "legacy");
        assert_eq!(legacy.metadata.as_ref().unwrap()["migrated"], "true");

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let items = on_disk["items"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.is_object()));
    }

    #[test]
    fn test_partial_record_does_not_empty_the_store() {
        let (_temp, path) = setup();
        std::fs::write(
            &path,
            r#"{"items": [
                {"id": "a", "processedAt": "2024-05-01T10:00:00Z", "platform": "telegram"},
                {"id": "b", "processedAt": "2024-05-01T11:00:00Z", "platform": "x"},
                {"id": "c", "processedAt": "2024-05-01T12:00:00Z"},
                {"processedAt": "2024-05-01T12:30:00Z", "platform": "x"},
                42,
                null
            ]}"#,
        )
        .unwrap();

        let store = ProcessedStore::load(&path, 10, Utc::now());
        assert_eq!(
            store.records().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c", "42"]
        );

        let repaired = store.records().nth(2).unwrap();
        assert_eq!(repaired.platform, "legacy");
        assert_eq!(repaired.processed_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");

        // Upgraded entries are written back as full records
        let reloaded = std::fs::read_to_string(&path).unwrap();
        let on_disk: serde_json::Value = serde_json::from_str(&reloaded).unwrap();
        assert_eq!(on_disk["items"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_read_only_open_never_rewrites() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path(), CacheNamespace::Production);
        let raw = r#"["old-1", "old-2"]"#;
        std::fs::write(layout.processed_path(), raw).unwrap();

        let store = ProcessedStore::open_read_only(&layout, 10);
        assert_eq!(store.len(), 2);
        assert!(store.contains("old-2"));
        assert_eq!(std::fs::read_to_string(layout.processed_path()).unwrap(), raw);
    }

    #[test]
    fn test_load_truncates_oversized_file() {
        let (_temp, path) = setup();
        let ids: Vec<String> = (0..6).map(|i| format!("\"id-{}\"", i)).collect();
        std::fs::write(&path, format!("[{}]", ids.join(","))).unwrap();

        let store = ProcessedStore::load(&path, 3, Utc::now());
        assert_eq!(
            store.records().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["id-3", "id-4", "id-5"]
        );
    }

    #[test]
    fn test_open_uses_namespaced_path() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path(), CacheNamespace::Test);
        let mut store = ProcessedStore::open(&layout, 5);
        store.append(record("z")).unwrap();

        assert!(temp.path().join("test_processed_items.json").exists());
        assert!(!temp.path().join("processed_items.json").exists());
    }
}
