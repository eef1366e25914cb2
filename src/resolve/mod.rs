//! Locator resolution: which locator-definition file broke the test.
//!
//! Strategies run strictly in order and the first hit wins:
//! static stack trace, oracle extraction + codebase search, step mapping.

pub mod disambiguate;
pub mod search;
pub mod stack_trace;
pub mod step_mapper;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ResolutionConfig;
use crate::llm::oracle::RepairOracle;
use crate::llm::prompts;
use search::{clean_extracted_locator, find_file_with_xpath};
use stack_trace::StackTraceResolver;
use step_mapper::StepMapper;

/// Everything a strategy may look at.
#[derive(Debug, Clone)]
pub struct FailureEvidence {
    pub error_text: String,
    pub test_title: String,
    pub artifacts_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    StaticTrace,
    OracleSearch,
    StepMapping,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::StaticTrace => "static_trace",
            StrategyKind::OracleSearch => "oracle_search",
            StrategyKind::StepMapping => "step_mapping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocator {
    pub file: PathBuf,
    /// Known only when the stack trace named it.
    pub key: Option<String>,
    pub strategy: StrategyKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: StrategyKind,
    pub hit: bool,
}

/// Result of the full chain, with one attempt record per strategy tried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub resolved: Option<ResolvedLocator>,
    pub attempts: Vec<StrategyAttempt>,
}

#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// `None` is an ordinary miss.
    async fn attempt(&self, evidence: &FailureEvidence) -> Option<ResolvedLocator>;
}

pub struct StaticTraceStrategy {
    resolver: StackTraceResolver,
}

impl StaticTraceStrategy {
    pub fn new(resolver: StackTraceResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl ResolutionStrategy for StaticTraceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StaticTrace
    }

    async fn attempt(&self, evidence: &FailureEvidence) -> Option<ResolvedLocator> {
        let found = self.resolver.resolve(&evidence.error_text).await?;
        Some(ResolvedLocator {
            file: found.path,
            key: Some(found.key),
            strategy: self.kind(),
        })
    }
}

pub struct OracleSearchStrategy {
    oracle: Arc<dyn RepairOracle>,
    locators_dir: PathBuf,
    extensions: Vec<String>,
}

impl OracleSearchStrategy {
    pub fn new(oracle: Arc<dyn RepairOracle>, locators_dir: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            oracle,
            locators_dir: locators_dir.into(),
            extensions,
        }
    }
}

#[async_trait]
impl ResolutionStrategy for OracleSearchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::OracleSearch
    }

    async fn attempt(&self, evidence: &FailureEvidence) -> Option<ResolvedLocator> {
        let reply = match self
            .oracle
            .complete(prompts::EXTRACT_SYSTEM_PROMPT, &evidence.error_text)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "locator extraction call failed");
                return None;
            }
        };
        let body = clean_extracted_locator(&reply)?;
        tracing::debug!(xpath = %body, "extracted raw locator");
        let file = find_file_with_xpath(&self.locators_dir, &self.extensions, &body).await?;
        Some(ResolvedLocator {
            file,
            key: None,
            strategy: self.kind(),
        })
    }
}

pub struct StepMappingStrategy {
    mapper: StepMapper,
    project_root: PathBuf,
}

impl StepMappingStrategy {
    pub fn new(mapper: StepMapper, project_root: impl Into<PathBuf>) -> Self {
        Self {
            mapper,
            project_root: project_root.into(),
        }
    }
}

#[async_trait]
impl ResolutionStrategy for StepMappingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StepMapping
    }

    async fn attempt(&self, evidence: &FailureEvidence) -> Option<ResolvedLocator> {
        let file = self
            .mapper
            .resolve(&evidence.error_text, &evidence.test_title, &evidence.artifacts_dir)
            .await?;
        Some(ResolvedLocator {
            file: self.project_root.join(file),
            key: None,
            strategy: self.kind(),
        })
    }
}

pub struct Resolver {
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl Resolver {
    pub fn new(strategies: Vec<Box<dyn ResolutionStrategy>>) -> Self {
        Self { strategies }
    }

    /// The standard chain. Without an extraction oracle the middle strategy is skipped.
    pub fn from_config(config: &ResolutionConfig, extract_oracle: Option<Arc<dyn RepairOracle>>) -> Self {
        let mut strategies: Vec<Box<dyn ResolutionStrategy>> = vec![Box::new(StaticTraceStrategy::new(
            StackTraceResolver::new(
                &config.project_root,
                &config.page_object_suffix,
                &config.default_import_extension,
                config.locator_extensions.clone(),
            ),
        ))];
        if let Some(oracle) = extract_oracle {
            strategies.push(Box::new(OracleSearchStrategy::new(
                oracle,
                config.locators_path(),
                config.locator_extensions.clone(),
            )));
        }
        strategies.push(Box::new(StepMappingStrategy::new(
            StepMapper::new(config.step_mapping_path(), config.variants.clone(), &config.project_root),
            &config.project_root,
        )));
        Self::new(strategies)
    }

    pub fn strategy_kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub async fn resolve(&self, evidence: &FailureEvidence) -> Resolution {
        let mut resolution = Resolution::default();
        for strategy in &self.strategies {
            let kind = strategy.kind();
            tracing::info!(strategy = kind.as_str(), "trying resolution strategy");
            let found = strategy.attempt(evidence).await;
            resolution.attempts.push(StrategyAttempt {
                strategy: kind,
                hit: found.is_some(),
            });
            if let Some(found) = found {
                tracing::info!(
                    strategy = kind.as_str(),
                    file = %found.file.display(),
                    key = ?found.key,
                    "locator file resolved"
                );
                resolution.resolved = Some(found);
                return resolution;
            }
            tracing::info!(strategy = kind.as_str(), "strategy missed");
        }
        tracing::warn!(title = %evidence.test_title, "locator unresolved; healing skipped");
        resolution
    }
}
