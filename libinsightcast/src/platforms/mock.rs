//! Mock platform implementation for testing
//!
//! A configurable stand-in for a real channel. Failures can be scripted per
//! item id or per attempt label, the probe answer can be fixed, and every call
//! is recorded in shared counters so a test can keep a clone of the
//! [`MockConfig`] and inspect it after the platform has been boxed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{PlatformError, Result};
use crate::platforms::{Attempt, Platform, ProbeReport};
use crate::rate_limiter::QuotaStatus;
use crate::types::{OutgoingMessage, PostReceipt, RenderedContent};

/// Configuration for mock platform behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Platform name recorded in the cache
    pub name: String,

    /// Fallback chain as (label, uses media when an image is available)
    pub strategies: Vec<(String, bool)>,

    /// Every attempt for these item ids fails with the given error
    pub item_failures: HashMap<String, PlatformError>,

    /// Attempts with these labels fail with the given error
    pub attempt_failures: HashMap<String, PlatformError>,

    /// Error returned by `probe`, if any
    pub probe_error: Option<PlatformError>,

    /// Quota readings returned by a successful probe
    pub probe_quotas: Vec<QuotaStatus>,

    /// Whether the mock offers a probe at all
    pub probe_supported: bool,

    /// Character limit for validation
    pub character_limit: Option<usize>,

    /// Whether the platform is configured
    pub is_configured: bool,

    /// Number of times probe has been called
    pub probe_call_count: Arc<Mutex<usize>>,

    /// Every (item id, attempt label) passed to send, in call order
    pub send_calls: Arc<Mutex<Vec<(String, String)>>>,

    /// Messages that were delivered successfully
    pub delivered: Arc<Mutex<Vec<OutgoingMessage>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            strategies: vec![("primary".to_string(), true)],
            item_failures: HashMap::new(),
            attempt_failures: HashMap::new(),
            probe_error: None,
            probe_quotas: Vec::new(),
            probe_supported: true,
            character_limit: None,
            is_configured: true,
            probe_call_count: Arc::new(Mutex::new(0)),
            send_calls: Arc::new(Mutex::new(Vec::new())),
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockConfig {
    pub fn failing_item(mut self, id: &str, error: PlatformError) -> Self {
        self.item_failures.insert(id.to_string(), error);
        self
    }

    pub fn failing_attempt(mut self, label: &str, error: PlatformError) -> Self {
        self.attempt_failures.insert(label.to_string(), error);
        self
    }

    /// Photo first, then plain text, like the Telegram chain
    pub fn with_photo_fallback(mut self) -> Self {
        self.strategies = vec![("photo".to_string(), true), ("text".to_string(), false)];
        self
    }

    pub fn probe_calls(&self) -> usize {
        *self.probe_call_count.lock().unwrap()
    }

    pub fn send_calls(&self) -> Vec<(String, String)> {
        self.send_calls.lock().unwrap().clone()
    }

    /// Item ids delivered successfully, in order
    pub fn delivered_ids(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.item_id.clone())
            .collect()
    }
}

/// Mock platform for testing
pub struct MockPlatform {
    config: MockConfig,
}

impl MockPlatform {
    /// Create a new mock platform with the given configuration
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Create a mock platform whose probe reports a failure
    pub fn probe_failure(name: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            probe_error: Some(error),
            ..Default::default()
        })
    }

    /// Create a mock platform with a character limit
    pub fn with_limit(name: &str, limit: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            character_limit: Some(limit),
            ..Default::default()
        })
    }

    /// Create a mock platform that is not configured
    pub fn not_configured(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            is_configured: false,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured
    }

    fn character_limit(&self, _with_media: bool) -> Option<usize> {
        self.config.character_limit
    }

    fn attempts(&self, content: &RenderedContent) -> Vec<Attempt> {
        self.config
            .strategies
            .iter()
            .map(|(label, uses_media)| {
                Attempt::new(label.clone(), 0, *uses_media && content.has_image())
            })
            .collect()
    }

    async fn send(
        &self,
        attempt: &Attempt,
        message: &OutgoingMessage,
        _content: &RenderedContent,
    ) -> Result<PostReceipt> {
        self.config
            .send_calls
            .lock()
            .unwrap()
            .push((message.item_id.clone(), attempt.label.clone()));

        if let Some(error) = self.config.item_failures.get(&message.item_id) {
            return Err(error.clone().into());
        }
        if let Some(error) = self.config.attempt_failures.get(&attempt.label) {
            return Err(error.clone().into());
        }

        let mut delivered = self.config.delivered.lock().unwrap();
        delivered.push(message.clone());

        Ok(PostReceipt {
            platform: self.config.name.clone(),
            attempt: attempt.label.clone(),
            message_id: Some(format!("{}-{}", self.config.name, delivered.len())),
            ..Default::default()
        })
    }

    async fn probe(&self) -> Result<ProbeReport> {
        *self.config.probe_call_count.lock().unwrap() += 1;

        if !self.config.probe_supported {
            return Ok(ProbeReport::unsupported());
        }
        if let Some(error) = &self.config.probe_error {
            return Err(error.clone().into());
        }
        Ok(ProbeReport {
            supported: true,
            identity: Some(format!("{}-account", self.config.name)),
            quotas: self.config.probe_quotas.clone(),
        })
    }
}
