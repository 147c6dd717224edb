//! Telegram platform implementation
//!
//! Posts to a channel or chat through the Bot API. Items with an image are
//! sent with `sendPhoto` first (URL or multipart upload) and fall back to a
//! plain `sendMessage` when the photo is rejected.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::config::TelegramConfig;
use crate::error::{PlatformError, Result};
use crate::platforms::{map_transport_error, Attempt, Platform, ProbeReport};
use crate::types::{LimitType, OutgoingMessage, PostReceipt, RateLimitSignal, RenderedContent};

/// Maximum length of a photo caption
pub const CAPTION_LIMIT: usize = 1024;

/// Maximum length of a text message
pub const MESSAGE_LIMIT: usize = 4096;

/// Cooldown assumed when a 429 carries no `retry_after`
const DEFAULT_RETRY_AFTER_SECS: i64 = 60;

/// Upper bound on a server-supplied `retry_after`
const MAX_RETRY_AFTER_SECS: i64 = 24 * 60 * 60;

/// Bot API envelope shared by every method
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SentMessage {
    pub message_id: i64,
    pub chat: Chat,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

/// Telegram Bot API client
pub struct TelegramClient {
    client: reqwest::Client,
    config: TelegramConfig,
    token: String,
}

impl TelegramClient {
    pub fn new(client: reqwest::Client, config: TelegramConfig, token: String) -> Self {
        Self {
            client,
            config,
            token,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.token,
            method
        )
    }

    async fn send_message(&self, text: &str) -> Result<SentMessage> {
        let body = json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "disable_web_page_preview": self.config.disable_link_preview,
        });
        let request = self.client.post(self.method_url("sendMessage")).json(&body);
        self.call(request, "sendMessage").await
    }

    async fn send_photo(&self, caption: &str, content: &RenderedContent) -> Result<SentMessage> {
        let request = match content {
            RenderedContent::ImageUrl(url) => {
                let body = json!({
                    "chat_id": self.config.chat_id,
                    "photo": url,
                    "caption": caption,
                });
                self.client.post(self.method_url("sendPhoto")).json(&body)
            }
            RenderedContent::ImageBytes { bytes, mime } => {
                let part = Part::bytes(bytes.clone())
                    .file_name(format!("insight.{}", mime.extension()))
                    .mime_str(mime.as_str())
                    .map_err(|e| PlatformError::Posting(format!("invalid image part: {}", e)))?;
                let form = Form::new()
                    .text("chat_id", self.config.chat_id.clone())
                    .text("caption", caption.to_string())
                    .part("photo", part);
                self.client.post(self.method_url("sendPhoto")).multipart(form)
            }
            RenderedContent::TextOnly => {
                return Err(PlatformError::Validation(
                    "photo attempt without rendered image".to_string(),
                )
                .into())
            }
        };
        self.call(request, "sendPhoto").await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(e, "Telegram", method))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, "Telegram", method))?;

        Ok(parse_response(status, &body, method, Utc::now().timestamp())?)
    }
}

/// Decode a Bot API reply into its result or a classified error
///
/// `now` is used to turn `retry_after` into an absolute reset time.
pub fn parse_response<T: DeserializeOwned>(
    status: u16,
    body: &str,
    method: &str,
    now: i64,
) -> std::result::Result<T, PlatformError> {
    let envelope: Option<ApiResponse<T>> = serde_json::from_str(body).ok();

    let (description, error_code, retry_after) = match envelope {
        Some(ApiResponse {
            ok: true,
            result: Some(result),
            ..
        }) => return Ok(result),
        Some(envelope) => (
            envelope
                .description
                .unwrap_or_else(|| "no description".to_string()),
            envelope.error_code.unwrap_or(status),
            envelope.parameters.and_then(|p| p.retry_after),
        ),
        None => (truncate_body(body), status, None),
    };

    let code = if error_code == 0 { status } else { error_code };
    Err(match code {
        429 => {
            let wait = retry_after
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
                .clamp(1, MAX_RETRY_AFTER_SECS);
            PlatformError::RateLimit(RateLimitSignal {
                limit_type: LimitType::General,
                reset_at: now.saturating_add(wait),
                details: format!("Telegram {} throttled: {} (retry after {}s)", method, description, wait),
            })
        }
        401 | 404 => PlatformError::Authentication(format!(
            "Telegram {} rejected the bot token ({}): {}. \
                Suggestion: Check the token file configured as telegram.bot_token_file.",
            method, code, description
        )),
        403 => PlatformError::Authentication(format!(
            "Telegram {} forbidden: {}. \
                Suggestion: Make sure the bot is a member of the chat and may post.",
            method, description
        )),
        500..=599 => PlatformError::Network(format!(
            "Telegram server error on {} ({}): {}",
            method, code, description
        )),
        _ => PlatformError::Posting(format!(
            "Telegram {} failed ({}): {}",
            method, code, description
        )),
    })
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        format!("{}…", trimmed.chars().take(200).collect::<String>())
    } else if trimmed.is_empty() {
        "empty response".to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl Platform for TelegramClient {
    fn name(&self) -> &str {
        "telegram"
    }

    fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.config.chat_id.trim().is_empty()
    }

    fn character_limit(&self, with_media: bool) -> Option<usize> {
        if with_media {
            Some(CAPTION_LIMIT)
        } else {
            Some(MESSAGE_LIMIT)
        }
    }

    fn attempts(&self, content: &RenderedContent) -> Vec<Attempt> {
        if content.has_image() {
            vec![Attempt::new("photo", 0, true), Attempt::new("text", 0, false)]
        } else {
            vec![Attempt::new("text", 0, false)]
        }
    }

    async fn send(
        &self,
        attempt: &Attempt,
        message: &OutgoingMessage,
        content: &RenderedContent,
    ) -> Result<PostReceipt> {
        self.validate_content(&message.text, attempt.include_media)?;

        let sent = if attempt.include_media {
            self.send_photo(&message.text, content).await?
        } else {
            self.send_message(&message.text).await?
        };

        Ok(PostReceipt {
            platform: self.name().to_string(),
            attempt: attempt.label.clone(),
            message_id: Some(sent.message_id.to_string()),
            chat_id: Some(sent.chat.id.to_string()),
            post_url: sent
                .chat
                .username
                .as_ref()
                .map(|u| format!("https://t.me/{}/{}", u, sent.message_id)),
            ..Default::default()
        })
    }

    async fn probe(&self) -> Result<ProbeReport> {
        let me: BotUser = self
            .call(self.client.get(self.method_url("getMe")), "getMe")
            .await?;
        Ok(ProbeReport {
            supported: true,
            identity: Some(
                me.username
                    .map(|u| format!("@{}", u))
                    .or(me.first_name)
                    .unwrap_or_else(|| me.id.to_string()),
            ),
            quotas: Vec::new(),
        })
    }
}
