use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{HealError, HealResult};
use crate::llm::provider::LlmProvider;
use crate::llm::registry::{OracleRole, ProviderRegistry};
use crate::llm::types::{CallConfig, ChatMessage};

/// Text-completion service consulted for locator extraction and repair.
///
/// Implementations return the raw reply text; shape checks happen at the call site.
#[async_trait]
pub trait RepairOracle: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> HealResult<String>;
}

/// Adapts a registered LLM provider and role to the oracle contract.
pub struct LlmOracle {
    provider: Arc<dyn LlmProvider>,
    cfg: CallConfig,
    timeout: Duration,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn LlmProvider>, cfg: CallConfig, timeout: Duration) -> Self {
        Self {
            provider,
            cfg,
            timeout,
        }
    }

    pub fn for_role(registry: &ProviderRegistry, role: OracleRole, timeout: Duration) -> HealResult<Self> {
        let (provider, cfg) = registry.call_config_for_role(role)?;
        Ok(Self::new(provider, cfg, timeout))
    }
}

#[async_trait]
impl RepairOracle for LlmOracle {
    async fn complete(&self, system: &str, user: &str) -> HealResult<String> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let call = self.provider.chat(messages, &self.cfg);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?.content),
            Err(_) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    seconds = self.timeout.as_secs(),
                    "oracle call timed out"
                );
                Err(HealError::OracleTimeout {
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Strip a surrounding markdown code fence (```` ```json ```` … ```` ``` ````).
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string (e.g. `json`) up to the first newline
        text = match rest.find('\n') {
            Some(idx) if rest[..idx].chars().all(|c| c.is_ascii_alphanumeric()) => &rest[idx + 1..],
            _ => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.trim()
}
