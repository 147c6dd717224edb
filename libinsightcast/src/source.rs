//! Item sources
//!
//! [`InsightsClient`] fetches the latest items from the insights API.
//! [`StaticSource`] serves a fixed batch, either built in code or loaded from
//! a JSON file.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::{read_secret, SourceConfig};
use crate::error::{InsightcastError, Result, SourceError};
use crate::types::Item;

/// Anything that can hand out the latest items, newest first
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn fetch_latest_items(&self, limit: usize) -> Result<Vec<Item>>;
}

/// Accepted response shapes; entries are decoded one by one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ItemsPayload {
    Bare(Vec<Value>),
    Data { data: Vec<Value> },
    Items { items: Vec<Value> },
}

impl ItemsPayload {
    fn into_entries(self) -> Vec<Value> {
        match self {
            ItemsPayload::Bare(entries) => entries,
            ItemsPayload::Data { data } => data,
            ItemsPayload::Items { items } => items,
        }
    }
}

/// Decode an insights API body
///
/// Only the envelope has to be well formed. An entry without a usable `id`
/// is logged and dropped; the rest of the batch is kept.
pub fn parse_items(body: &str) -> Result<Vec<Item>> {
    let payload: ItemsPayload = serde_json::from_str(body)
        .map_err(|e| SourceError::Decode(e.to_string()))?;

    let entries = payload.into_entries();
    let total = entries.len();
    let items: Vec<Item> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<Item>(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping insights entry #{}: {}", index, e);
                None
            }
        })
        .collect();

    if items.len() < total {
        warn!("Decoded {} of {} insights entries", items.len(), total);
    }
    Ok(items)
}

/// HTTP client for the insights API
pub struct InsightsClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl InsightsClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
        }
    }

    /// Build from configuration, reading the API key file if one is set
    pub fn from_config(client: reqwest::Client, config: &SourceConfig) -> Result<Self> {
        let api_key = match &config.api_key_file {
            Some(path) => Some(read_secret(path, "source.api_key_file")?),
            None => None,
        };
        Ok(Self::new(client, config.url.clone(), api_key))
    }
}

#[async_trait]
impl ItemSource for InsightsClient {
    async fn fetch_latest_items(&self, limit: usize) -> Result<Vec<Item>> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("limit", limit.to_string())]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Request(e.without_url().to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Request(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            }
            .into());
        }

        let mut items = parse_items(&body)?;
        items.truncate(limit);
        debug!("Fetched {} items from insights API", items.len());
        Ok(items)
    }
}

/// Fixed batch of items
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    items: Vec<Item>,
}

impl StaticSource {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }

    /// Load a batch saved from the insights API (any accepted shape)
    pub fn from_file(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path).map_err(|e| {
            InsightcastError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(Self::new(parse_items(&body)?))
    }
}

#[async_trait]
impl ItemSource for StaticSource {
    async fn fetch_latest_items(&self, limit: usize) -> Result<Vec<Item>> {
        Ok(self.items.iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Background;
    use tempfile::TempDir;

    #[test]
    fn test_parse_items_accepts_all_shapes() {
        let bare = r#"[{"id": 1, "publishedAt": "2024-05-01T10:00:00Z", "headline": "a"}]"#;
        let data = r#"{"data": [{"id": "2", "headline": "b"}], "meta": {"count": 1}}"#;
        let items = r#"{"items": [{"id": "3", "title": "c"}]}"#;

        assert_eq!(parse_items(bare).unwrap()[0].id, "1");
        assert_eq!(parse_items(data).unwrap()[0].id, "2");
        assert_eq!(parse_items(items).unwrap()[0].id, "3");
    }

    #[test]
    fn test_epoch_timestamp_only_disqualifies_its_own_item() {
        let body = r#"[
            {"id": "good", "publishedAt": "2024-05-01T10:00:00Z", "headline": "ok"},
            {"id": "bad", "publishedAt": 1714557600, "headline": "epoch"}
        ]"#;

        let items = parse_items(body).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].published_at().is_some());
        assert_eq!(items[1].id, "bad");
        assert_eq!(items[1].published_at, None);
        assert_eq!(items[1].published_at(), None);
    }

    #[test]
    fn test_malformed_background_falls_back_to_none() {
        let body = r#"{"data": [
            {"id": "a", "headline": "x", "background": "none"},
            {"id": "b", "headline": "y", "background": {"type": 7, "value": ["red"]}},
            {"id": "c", "headline": 42, "title": "z", "url": false}
        ]}"#;

        let items = parse_items(body).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].background(), Background::None);
        assert_eq!(items[1].background(), Background::None);
        assert_eq!(items[2].text(), Some("z"));
        assert_eq!(items[2].url, None);
    }

    #[test]
    fn test_entries_without_id_are_dropped() {
        let body = r#"[{"headline": "no id"}, {"id": null}, {"id": "kept"}, "junk"]"#;

        let items = parse_items(body).unwrap();
        assert_eq!(items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["kept"]);
    }

    #[test]
    fn test_parse_items_rejects_garbage() {
        let err = parse_items(r#"{"results": 3}"#).unwrap_err();
        assert!(matches!(err, InsightcastError::Source(SourceError::Decode(_))));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_static_source_respects_limit() {
        let items: Vec<Item> = (0..5)
            .map(|i| Item::new(i.to_string(), chrono::Utc::now(), "x"))
            .collect();
        let source = StaticSource::new(items);

        let fetched = source.fetch_latest_items(3).await.unwrap();
        assert_eq!(
            fetched.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["0", "1", "2"]
        );
    }

    #[tokio::test]
    async fn test_static_source_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("batch.json");
        std::fs::write(&path, r#"{"data": [{"id": "a"}, {"id": "b"}]}"#).unwrap();

        let source = StaticSource::from_file(&path).unwrap();
        assert_eq!(source.fetch_latest_items(10).await.unwrap().len(), 2);

        let missing = StaticSource::from_file(&temp.path().join("nope.json")).unwrap_err();
        assert_eq!(missing.exit_code(), 3);
    }

    #[test]
    fn test_from_config_reads_api_key() {
        let temp = TempDir::new().unwrap();
        let key = temp.path().join("source.key");
        std::fs::write(&key, "k-123\n").unwrap();

        let config = SourceConfig {
            url: "https://insights.example.com/latest".to_string(),
            api_key_file: Some(key.to_string_lossy().to_string()),
            fetch_limit: 10,
        };
        let client = InsightsClient::from_config(reqwest::Client::new(), &config).unwrap();
        assert_eq!(client.api_key.as_deref(), Some("k-123"));
    }
}
