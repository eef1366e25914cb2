use async_trait::async_trait;

use crate::errors::{HealError, HealResult};

/// The rendered page a failing test left behind.
///
/// The browser harness implements this; the pipeline only needs to run a
/// script against the live document and to serialize its markup.
#[async_trait]
pub trait RenderedPage: Send + Sync {
    /// Evaluate a script in the page and return its JSON-serialisable result.
    async fn evaluate(&self, script: &str) -> HealResult<serde_json::Value>;

    /// Serialize the current document markup.
    async fn content(&self) -> HealResult<String>;

    fn url(&self) -> Option<String> {
        None
    }

    /// Base64-encoded PNG of the full page.
    async fn screenshot_base64(&self) -> HealResult<String> {
        Err(HealError::Page("screenshots not supported by this page".into()))
    }
}

/// A page reconstructed from a saved DOM snapshot. Scripts cannot run against it.
#[derive(Debug, Clone)]
pub struct SnapshotPage {
    markup: String,
    url: Option<String>,
}

impl SnapshotPage {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[async_trait]
impl RenderedPage for SnapshotPage {
    async fn evaluate(&self, _script: &str) -> HealResult<serde_json::Value> {
        Err(HealError::Page("script evaluation unavailable for a static snapshot".into()))
    }

    async fn content(&self) -> HealResult<String> {
        Ok(self.markup.clone())
    }

    fn url(&self) -> Option<String> {
        self.url.clone()
    }
}
