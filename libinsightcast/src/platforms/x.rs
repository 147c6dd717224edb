//! X (Twitter) platform implementation
//!
//! Posts through the v2 API with OAuth 2.0 user-context bearer tokens. A
//! secondary account can be configured; each account is one attempt and
//! there is no text-only fallback within an account.
//!
//! Rate-limit state is read from the response headers:
//!
//! | header prefix               | tier         |
//! |-----------------------------|--------------|
//! | `x-user-limit-24hour-*`     | user daily   |
//! | `x-app-limit-24hour-*`      | app daily    |
//! | `x-rate-limit-*`            | general      |

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{PlatformError, Result};
use crate::platforms::{map_transport_error, Attempt, Platform, ProbeReport};
use crate::rate_limiter::{select_exhausted_tier, QuotaStatus};
use crate::types::{
    ImageMimeType, LimitType, OutgoingMessage, PostReceipt, RateLimitSignal, RenderedContent,
};

/// Post length limit for standard accounts
pub const POST_LIMIT: usize = 280;

/// Fallback cooldown for a 429 without usable reset headers
const DEFAULT_COOLDOWN_SECS: i64 = 15 * 60;

const QUOTA_HEADERS: [(&str, &str, LimitType); 3] = [
    (
        "x-user-limit-24hour-remaining",
        "x-user-limit-24hour-reset",
        LimitType::UserDaily,
    ),
    (
        "x-app-limit-24hour-remaining",
        "x-app-limit-24hour-reset",
        LimitType::AppDaily,
    ),
    ("x-rate-limit-remaining", "x-rate-limit-reset", LimitType::General),
];

/// One set of credentials
#[derive(Clone)]
pub struct XAccount {
    pub label: String,
    token: String,
}

impl XAccount {
    pub fn new(label: impl Into<String>, token: String) -> Self {
        Self {
            label: label.into(),
            token,
        }
    }
}

impl std::fmt::Debug for XAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XAccount")
            .field("label", &self.label)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadedMedia {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Me {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

/// X API v2 client
pub struct XClient {
    client: reqwest::Client,
    api_base: String,
    accounts: Vec<XAccount>,
}

impl XClient {
    pub fn new(client: reqwest::Client, api_base: String, accounts: Vec<XAccount>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            accounts,
        }
    }

    fn account(&self, index: usize) -> Result<&XAccount> {
        self.accounts.get(index).ok_or_else(|| {
            PlatformError::Validation(format!("no X account configured at position {}", index))
                .into()
        })
    }

    async fn image_bytes(&self, content: &RenderedContent) -> Result<(Vec<u8>, ImageMimeType)> {
        match content {
            RenderedContent::ImageBytes { bytes, mime } => Ok((bytes.clone(), *mime)),
            RenderedContent::ImageUrl(url) => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| map_transport_error(e, "X", "image download"))?;
                if !response.status().is_success() {
                    return Err(PlatformError::Posting(format!(
                        "image download returned HTTP {}",
                        response.status().as_u16()
                    ))
                    .into());
                }
                let mime = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(ImageMimeType::from_mime_str)
                    .ok_or_else(|| {
                        PlatformError::Posting(format!("{} is not a supported image type", url))
                    })?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| map_transport_error(e, "X", "image download"))?;
                Ok((bytes.to_vec(), mime))
            }
            RenderedContent::TextOnly => Err(PlatformError::Validation(
                "media attempt without rendered image".to_string(),
            )
            .into()),
        }
    }

    async fn upload_media(&self, account: &XAccount, content: &RenderedContent) -> Result<String> {
        let (bytes, mime) = self.image_bytes(content).await?;
        let part = Part::bytes(bytes)
            .file_name(format!("insight.{}", mime.extension()))
            .mime_str(mime.as_str())
            .map_err(|e| PlatformError::Posting(format!("invalid media part: {}", e)))?;
        let form = Form::new()
            .text("media_category", "tweet_image")
            .part("media", part);

        let request = self
            .client
            .post(format!("{}/2/media/upload", self.api_base))
            .bearer_auth(&account.token)
            .multipart(form);
        let (_, uploaded): (HeaderMap, DataEnvelope<UploadedMedia>) =
            self.call(request, "media upload").await?;
        debug!("Uploaded media {} for {}", uploaded.data.id, account.label);
        Ok(uploaded.data.id)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<(HeaderMap, T)> {
        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(e, "X", context))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, "X", context))?;

        if !(200..300).contains(&status) {
            return Err(classify_error(status, &headers, &body, context, Utc::now().timestamp()).into());
        }
        let value = serde_json::from_str(&body).map_err(|e| {
            PlatformError::Posting(format!("X {} returned an unexpected body: {}", context, e))
        })?;
        Ok((headers, value))
    }
}

/// Quota readings present in a response's headers
pub fn quotas_from_headers(headers: &HeaderMap) -> Vec<QuotaStatus> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .map(str::to_string)
    };

    QUOTA_HEADERS
        .iter()
        .filter_map(|(remaining, reset, limit_type)| {
            let remaining = read(remaining)?.parse::<u64>().ok()?;
            let reset_at = read(reset)?.parse::<i64>().ok()?;
            Some(QuotaStatus {
                limit_type: *limit_type,
                remaining,
                reset_at,
            })
        })
        .collect()
}

/// Turn a non-2xx reply into a classified error
pub fn classify_error(
    status: u16,
    headers: &HeaderMap,
    body: &str,
    context: &str,
    now: i64,
) -> PlatformError {
    let detail = error_detail(body);
    match status {
        429 => {
            let quotas = quotas_from_headers(headers);
            let signal = select_exhausted_tier(&quotas).unwrap_or_else(|| RateLimitSignal {
                limit_type: LimitType::General,
                reset_at: quotas
                    .iter()
                    .map(|q| q.reset_at)
                    .max()
                    .unwrap_or(now + DEFAULT_COOLDOWN_SECS),
                details: String::new(),
            });
            PlatformError::RateLimit(RateLimitSignal {
                details: format!("X {} returned 429 ({} quota): {}", context, signal.limit_type, detail),
                ..signal
            })
        }
        401 => PlatformError::Authentication(format!(
            "X {} unauthorized: {}. \
                Suggestion: The OAuth 2.0 token may have expired; refresh it and update the token file.",
            context, detail
        )),
        403 if detail.to_lowercase().contains("duplicate") => {
            PlatformError::Validation(format!("X {} rejected duplicate content: {}", context, detail))
        }
        403 => PlatformError::Authentication(format!(
            "X {} forbidden: {}. \
                Suggestion: Check the app permissions and the token scopes (tweet.write, media.write).",
            context, detail
        )),
        400 | 422 => PlatformError::Validation(format!("X {} rejected the request: {}", context, detail)),
        500..=599 => PlatformError::Network(format!("X server error on {} ({}): {}", context, status, detail)),
        _ => PlatformError::Posting(format!("X {} failed ({}): {}", context, status, detail)),
    }
}

/// Pull a readable message out of an X error body
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        detail: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        errors: Vec<ErrorItem>,
    }
    #[derive(Deserialize)]
    struct ErrorItem {
        #[serde(default)]
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed
            .detail
            .or_else(|| parsed.errors.into_iter().find_map(|e| e.message))
            .or(parsed.title)
        {
            return message;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

#[async_trait]
impl Platform for XClient {
    fn name(&self) -> &str {
        "x"
    }

    fn is_configured(&self) -> bool {
        !self.accounts.is_empty()
    }

    fn character_limit(&self, _with_media: bool) -> Option<usize> {
        Some(POST_LIMIT)
    }

    fn attempts(&self, content: &RenderedContent) -> Vec<Attempt> {
        self.accounts
            .iter()
            .enumerate()
            .map(|(index, account)| Attempt::new(account.label.clone(), index, content.has_image()))
            .collect()
    }

    async fn send(
        &self,
        attempt: &Attempt,
        message: &OutgoingMessage,
        content: &RenderedContent,
    ) -> Result<PostReceipt> {
        self.validate_content(&message.text, attempt.include_media)?;
        let account = self.account(attempt.account)?;

        let mut body = json!({ "text": message.text });
        if attempt.include_media {
            let media_id = self.upload_media(account, content).await?;
            body["media"] = json!({ "media_ids": [media_id] });
        }

        let request = self
            .client
            .post(format!("{}/2/tweets", self.api_base))
            .bearer_auth(&account.token)
            .json(&body);
        let (headers, created): (HeaderMap, DataEnvelope<CreatedPost>) =
            self.call(request, "create post").await?;

        for quota in quotas_from_headers(&headers) {
            debug!(
                "X {} quota: {} remaining, resets at {}",
                quota.limit_type, quota.remaining, quota.reset_at
            );
        }

        Ok(PostReceipt {
            platform: self.name().to_string(),
            attempt: attempt.label.clone(),
            post_url: Some(format!("https://x.com/i/web/status/{}", created.data.id)),
            post_id: Some(created.data.id),
            ..Default::default()
        })
    }

    async fn probe(&self) -> Result<ProbeReport> {
        let account = self.account(0)?;
        let request = self
            .client
            .get(format!("{}/2/users/me", self.api_base))
            .bearer_auth(&account.token);
        let (headers, me): (HeaderMap, DataEnvelope<Me>) = self.call(request, "users/me").await?;

        Ok(ProbeReport {
            supported: true,
            identity: Some(
                me.data
                    .username
                    .map(|u| format!("@{}", u))
                    .unwrap_or(me.data.id),
            ),
            quotas: quotas_from_headers(&headers),
        })
    }
}
