use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    /// The oracle did not answer within the configured budget.
    #[error("Oracle call timed out after {seconds}s")]
    OracleTimeout { seconds: u64 },

    /// The oracle answered, but not in the agreed shape. Never retried.
    #[error("Oracle contract violation: {reason} (reply: {reply_excerpt})")]
    OracleContract {
        reason: String,
        reply_excerpt: String,
    },

    /// `invalid_keys` failed DOM validation; `unvalidated_keys` were never
    /// checked because every round for them ended in a transport failure.
    #[error(
        "Failed to heal locators after {attempts} attempts; invalid: [{}], never validated: [{}]",
        invalid_keys.join(", "),
        unvalidated_keys.join(", ")
    )]
    Exhausted {
        attempts: u32,
        invalid_keys: Vec<String>,
        unvalidated_keys: Vec<String>,
    },

    #[error("Page error: {0}")]
    Page(String),

    #[error("Locator file error: {0}")]
    LocatorFile(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl HealError {
    /// Transport-level oracle failures consume a retry but do not end the run.
    pub fn is_transient_oracle_failure(&self) -> bool {
        matches!(
            self,
            HealError::OracleTimeout { .. } | HealError::LlmProvider(_) | HealError::Http(_)
        )
    }

    pub(crate) fn contract(reason: impl Into<String>, reply: &str) -> Self {
        let reply_excerpt: String = reply.chars().take(200).collect();
        HealError::OracleContract {
            reason: reason.into(),
            reply_excerpt,
        }
    }
}

pub type HealResult<T> = Result<T, HealError>;
