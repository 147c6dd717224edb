//! Content rendering
//!
//! Turns an item's background descriptor into something a platform can
//! attach. Only remote images are attachable in this build; color
//! backgrounds are posted as text.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{Background, Item, RenderedContent};

#[async_trait]
pub trait ContentRenderer: Send + Sync {
    async fn render(&self, item: &Item) -> Result<RenderedContent>;
}

/// Renderer driven by the item's `background` field
#[derive(Debug, Clone, Default)]
pub struct BackgroundRenderer;

impl BackgroundRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContentRenderer for BackgroundRenderer {
    async fn render(&self, item: &Item) -> Result<RenderedContent> {
        match item.background() {
            Background::Image(url) if url.starts_with("https://") || url.starts_with("http://") => {
                Ok(RenderedContent::ImageUrl(url))
            }
            Background::Image(url) => {
                warn!("Item {}: ignoring non-http image background {:?}", item.id, url);
                Ok(RenderedContent::TextOnly)
            }
            Background::Color(color) => {
                debug!("Item {}: color background {} posted as text", item.id, color);
                Ok(RenderedContent::TextOnly)
            }
            Background::None => Ok(RenderedContent::TextOnly),
        }
    }
}
