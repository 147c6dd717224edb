//! Core types for Insightcast

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PlatformError;

// ============================================================================
// Source items
// ============================================================================

/// One insight as returned by the insights API
///
/// Only `id` is mandatory on the wire. Everything else is optional so that a
/// single malformed entry degrades to "not eligible" instead of failing the
/// whole batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "published_at", deserialize_with = "lenient")]
    pub published_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub headline: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub background: Option<BackgroundSpec>,
}

/// Raw background descriptor attached to an item
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackgroundSpec {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// Normalized background kind, used to pick a rendering strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Background {
    Image(String),
    Color(String),
    None,
}

impl Item {
    pub fn new(id: impl Into<String>, published_at: DateTime<Utc>, headline: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            published_at: Some(published_at.to_rfc3339()),
            headline: Some(headline.into()),
            title: None,
            url: None,
            background: None,
        }
    }

    pub fn with_background(mut self, kind: &str, value: &str) -> Self {
        self.background = Some(BackgroundSpec {
            kind: Some(kind.to_string()),
            value: Some(value.to_string()),
        });
        self
    }

    /// Parsed publication time
    ///
    /// Accepts RFC 3339 or `YYYY-MM-DD HH:MM:SS` (read as UTC). Returns `None`
    /// when the field is missing or unparsable.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.published_at.as_deref()?.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    /// Headline, falling back to title; blank strings count as missing
    pub fn text(&self) -> Option<&str> {
        [self.headline.as_deref(), self.title.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    pub fn background(&self) -> Background {
        let Some(spec) = &self.background else {
            return Background::None;
        };
        let value = match spec.value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => return Background::None,
        };
        match spec.kind.as_deref().map(|k| k.trim().to_lowercase()).as_deref() {
            Some("image") => Background::Image(value),
            Some("color") | Some("colour") => Background::Color(value),
            _ => Background::None,
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// Optional field that reads as `None` when the value has the wrong shape
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

// ============================================================================
// Cache records
// ============================================================================

/// One processed (posted or pre-seeded) item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedRecord {
    pub id: String,
    pub processed_at: DateTime<Utc>,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_response: Option<PlatformResponse>,
}

/// Platform identifiers captured after a successful post. Informational only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,
}

impl ProcessedRecord {
    /// Record for an item that was just delivered
    pub fn sent(item: &Item, receipt: &PostReceipt, now: DateTime<Utc>) -> Self {
        let mut metadata = BTreeMap::new();
        if let Some(spec) = &item.background {
            if let Some(kind) = &spec.kind {
                metadata.insert("backgroundType".to_string(), kind.clone());
            }
            if let Some(value) = &spec.value {
                metadata.insert("backgroundValue".to_string(), value.clone());
            }
        }
        metadata.insert("attempt".to_string(), receipt.attempt.clone());

        Self {
            id: item.id.clone(),
            processed_at: now,
            platform: receipt.platform.clone(),
            metadata: Some(metadata),
            platform_response: Some(receipt.response()),
        }
    }

    /// Record for an item marked processed without being posted
    pub fn seeded(item: &Item, now: DateTime<Utc>) -> Self {
        let mut metadata = BTreeMap::new();
        if let Some(published) = &item.published_at {
            metadata.insert("publishedAt".to_string(), published.clone());
        }
        Self {
            id: item.id.clone(),
            processed_at: now,
            platform: "seed".to_string(),
            metadata: Some(metadata),
            platform_response: None,
        }
    }

    /// Upgrade of a bare-ID entry written by older releases
    pub fn legacy(id: String, now: DateTime<Utc>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("migrated".to_string(), "true".to_string());
        Self {
            id,
            processed_at: now,
            platform: "legacy".to_string(),
            metadata: Some(metadata),
            platform_response: None,
        }
    }
}

/// The most recently sent item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatestMarker {
    pub id: String,
    pub published_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
}

impl LatestMarker {
    pub fn for_item(item: &Item, now: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            id: item.id.clone(),
            published_at: item.published_at()?,
            sent_at: now,
        })
    }
}

// ============================================================================
// Rate limits
// ============================================================================

/// Quota tier that ran out
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    /// Per-user 24 hour posting cap
    UserDaily,
    /// Per-app 24 hour posting cap
    AppDaily,
    /// Short window limit, or a 429 without tier detail
    General,
}

impl LimitType {
    /// Higher is more specific
    pub fn specificity(&self) -> u8 {
        match self {
            LimitType::UserDaily => 3,
            LimitType::AppDaily => 2,
            LimitType::General => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::UserDaily => "user_daily",
            LimitType::AppDaily => "app_daily",
            LimitType::General => "general",
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quota exhaustion as observed on a platform response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSignal {
    pub limit_type: LimitType,
    /// Unix seconds
    pub reset_at: i64,
    pub details: String,
}

impl fmt::Display for RateLimitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} quota, resets at {})",
            self.details, self.limit_type, self.reset_at
        )
    }
}

impl From<RateLimitSignal> for PlatformError {
    fn from(signal: RateLimitSignal) -> Self {
        PlatformError::RateLimit(signal)
    }
}

/// Persisted cooldown, survives process restarts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub limit_type: LimitType,
    pub reset_timestamp: i64,
    pub details: String,
    pub detected_at: DateTime<Utc>,
}

impl RateLimitRecord {
    pub fn from_signal(signal: &RateLimitSignal, now: DateTime<Utc>) -> Self {
        Self {
            limit_type: signal.limit_type,
            reset_timestamp: signal.reset_at,
            details: signal.details.clone(),
            detected_at: now,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() < self.reset_timestamp
    }

    /// Time left in the cooldown window, `None` once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let secs = self.reset_timestamp.saturating_sub(now.timestamp());
        (secs > 0).then(|| std::time::Duration::from_secs(secs as u64))
    }
}

// ============================================================================
// Rendering and posting
// ============================================================================

/// Supported image MIME types for uploads
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageMimeType {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageMimeType {
    /// Parse MIME type from a Content-Type value (parameters are ignored)
    pub fn from_mime_str(s: &str) -> Option<Self> {
        let essence = s.split(';').next().unwrap_or_default().trim();
        match essence.to_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }
}

impl fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of the content renderer
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedContent {
    ImageUrl(String),
    ImageBytes { bytes: Vec<u8>, mime: ImageMimeType },
    TextOnly,
}

impl RenderedContent {
    pub fn has_image(&self) -> bool {
        !matches!(self, RenderedContent::TextOnly)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RenderedContent::ImageUrl(_) => "image_url",
            RenderedContent::ImageBytes { .. } => "image_bytes",
            RenderedContent::TextOnly => "text",
        }
    }
}

/// Text to publish for one item
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub item_id: String,
    pub text: String,
}

const ELLIPSIS: char = '…';

impl OutgoingMessage {
    /// Build the post text for an item, fitting it into `limit` characters
    ///
    /// The link is kept whole when there is room for it; the headline is
    /// shortened first.
    pub fn compose(item: &Item, limit: Option<usize>) -> std::result::Result<Self, PlatformError> {
        let headline = item.text().ok_or_else(|| {
            PlatformError::Validation(format!("item {} has no headline or title", item.id))
        })?;

        let suffix = item
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| format!("\n\n{}", u))
            .unwrap_or_default();

        let text = match limit {
            None => format!("{}{}", headline, suffix),
            Some(limit) => {
                let suffix_len = suffix.chars().count();
                if suffix_len > 0 && limit > suffix_len + 16 {
                    format!("{}{}", truncate_chars(headline, limit - suffix_len), suffix)
                } else {
                    truncate_chars(headline, limit)
                }
            }
        };

        Ok(Self {
            item_id: item.id.clone(),
            text,
        })
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push(ELLIPSIS);
    out
}

/// Successful post acknowledgement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostReceipt {
    pub platform: String,
    /// Label of the attempt that succeeded (e.g. "photo", "text", "primary")
    pub attempt: String,
    pub message_id: Option<String>,
    pub chat_id: Option<String>,
    pub post_id: Option<String>,
    pub post_url: Option<String>,
}

impl PostReceipt {
    pub fn response(&self) -> PlatformResponse {
        PlatformResponse {
            message_id: self.message_id.clone(),
            chat_id: self.chat_id.clone(),
            post_id: self.post_id.clone(),
            post_url: self.post_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_item_deserializes_numeric_and_string_ids() {
        let items: Vec<Item> = serde_json::from_str(
            r#"[
                {"id": 4711, "publishedAt": "2024-05-01T10:00:00Z", "headline": "a"},
                {"id": "abc-1", "published_at": "2024-05-01 10:05:00", "title": "b"}
            ]"#,
        )
        .unwrap();

        assert_eq!(items[0].id, "4711");
        assert_eq!(items[1].id, "abc-1");
        assert_eq!(items[1].published_at(), Some(ts("2024-05-01T10:05:00Z")));
    }

    #[test]
    fn test_published_at_handles_offsets_and_garbage() {
        let mut item = Item::new("1", Utc::now(), "x");
        item.published_at = Some("2024-05-01T12:00:00+02:00".to_string());
        assert_eq!(item.published_at(), Some(ts("2024-05-01T10:00:00Z")));

        item.published_at = Some("yesterday-ish".to_string());
        assert_eq!(item.published_at(), None);

        item.published_at = None;
        assert_eq!(item.published_at(), None);
    }

    #[test]
    fn test_text_prefers_headline_then_title() {
        let mut item = Item::new("1", Utc::now(), "  ");
        item.title = Some("Fallback title".to_string());
        assert_eq!(item.text(), Some("Fallback title"));

        item.headline = Some("Headline".to_string());
        assert_eq!(item.text(), Some("Headline"));

        item.headline = None;
        item.title = None;
        assert_eq!(item.text(), None);
    }

    #[test]
    fn test_background_normalization() {
        let item = Item::new("1", Utc::now(), "x");
        assert_eq!(item.background(), Background::None);

        let image = item.clone().with_background("IMAGE", "https://cdn.example/a.png");
        assert_eq!(
            image.background(),
            Background::Image("https://cdn.example/a.png".to_string())
        );

        let color = item.clone().with_background("color", "#112233");
        assert_eq!(color.background(), Background::Color("#112233".to_string()));

        let unknown = item.clone().with_background("gradient", "#000");
        assert_eq!(unknown.background(), Background::None);

        let empty = item.with_background("image", " ");
        assert_eq!(empty.background(), Background::None);
    }

    #[test]
    fn test_compose_without_limit_appends_url() {
        let mut item = Item::new("1", Utc::now(), "Markets rally");
        item.url = Some("https://example.com/i/1".to_string());

        let message = OutgoingMessage::compose(&item, None).unwrap();
        assert_eq!(message.text, "Markets rally\n\nhttps://example.com/i/1");
        assert_eq!(message.item_id, "1");
    }

    #[test]
    fn test_compose_truncates_headline_but_keeps_url() {
        let mut item = Item::new("1", Utc::now(), "a".repeat(400));
        item.url = Some("https://example.com/i/1".to_string());

        let message = OutgoingMessage::compose(&item, Some(280)).unwrap();
        assert_eq!(message.text.chars().count(), 280);
        assert!(message.text.ends_with("https://example.com/i/1"));
        assert!(message.text.contains('…'));
    }

    #[test]
    fn test_compose_rejects_items_without_text() {
        let mut item = Item::new("9", Utc::now(), "");
        item.headline = None;
        let err = OutgoingMessage::compose(&item, Some(100)).unwrap_err();
        assert!(matches!(err, PlatformError::Validation(_)));
        assert!(err.to_string().contains("9"));
    }

    #[test]
    fn test_rate_limit_record_activity_window() {
        let now = ts("2024-05-01T10:00:00Z");
        let record = RateLimitRecord {
            limit_type: LimitType::General,
            reset_timestamp: (now + Duration::minutes(15)).timestamp(),
            details: "429".to_string(),
            detected_at: now,
        };

        assert!(record.is_active(now));
        assert_eq!(
            record.remaining(now),
            Some(std::time::Duration::from_secs(900))
        );
        assert!(!record.is_active(now + Duration::minutes(15)));
        assert_eq!(record.remaining(now + Duration::minutes(20)), None);
    }

    #[test]
    fn test_rate_limit_record_json_shape() {
        let record = RateLimitRecord {
            limit_type: LimitType::AppDaily,
            reset_timestamp: 1_714_600_000,
            details: "app cap".to_string(),
            detected_at: ts("2024-05-01T10:00:00Z"),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["limitType"], "app_daily");
        assert_eq!(json["resetTimestamp"], 1_714_600_000);
        assert!(json.get("detectedAt").is_some());
    }

    #[test]
    fn test_sent_record_captures_metadata_and_response() {
        let item = Item::new("42", Utc::now(), "x").with_background("image", "https://a/b.png");
        let receipt = PostReceipt {
            platform: "telegram".to_string(),
            attempt: "photo".to_string(),
            message_id: Some("77".to_string()),
            chat_id: Some("-100123".to_string()),
            ..Default::default()
        };

        let record = ProcessedRecord::sent(&item, &receipt, Utc::now());
        let metadata = record.metadata.as_ref().unwrap();
        assert_eq!(metadata["backgroundType"], "image");
        assert_eq!(metadata["attempt"], "photo");
        assert_eq!(
            record.platform_response.as_ref().unwrap().message_id.as_deref(),
            Some("77")
        );
    }

    #[test]
    fn test_mime_from_content_type_with_params() {
        assert_eq!(
            ImageMimeType::from_mime_str("image/png; charset=binary"),
            Some(ImageMimeType::Png)
        );
        assert_eq!(ImageMimeType::from_mime_str("text/html"), None);
        assert_eq!(ImageMimeType::Jpeg.extension(), "jpg");
    }
}
