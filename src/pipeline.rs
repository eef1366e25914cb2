//! End-to-end handling of one failed test: artifacts, resolution, healing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;

use crate::artifacts::{ArtifactStore, RunTrace, EVIDENCE_FILE};
use crate::config::AppConfig;
use crate::dom::{DomQueryEvaluator, EvidenceCollector, XPathEvaluator};
use crate::errors::HealResult;
use crate::failure::FailureReport;
use crate::heal::{HealReport, HealState, LocatorHealer};
use crate::labels::extract::extract_page_labels;
use crate::labels::heal::{apply_label_healing, LabelHealer};
use crate::llm::oracle::{LlmOracle, RepairOracle};
use crate::llm::prompts;
use crate::llm::registry::{OracleRole, ProviderRegistry};
use crate::locator::LocatorFile;
use crate::page::RenderedPage;
use crate::resolve::{FailureEvidence, Resolution, Resolver};

/// The three oracle roles the pipeline consults.
#[derive(Clone)]
pub struct Oracles {
    pub repair: Arc<dyn RepairOracle>,
    pub extract: Arc<dyn RepairOracle>,
    pub labels: Arc<dyn RepairOracle>,
}

impl Oracles {
    /// One oracle for every role.
    pub fn shared(oracle: Arc<dyn RepairOracle>) -> Self {
        Self {
            repair: oracle.clone(),
            extract: oracle.clone(),
            labels: oracle,
        }
    }

    pub fn from_registry(registry: &ProviderRegistry, timeout: Duration) -> HealResult<Self> {
        Ok(Self {
            repair: Arc::new(LlmOracle::for_role(registry, OracleRole::Repair, timeout)?),
            extract: Arc::new(LlmOracle::for_role(registry, OracleRole::Extract, timeout)?),
            labels: Arc::new(LlmOracle::for_role(registry, OracleRole::Labels, timeout)?),
        })
    }
}

#[derive(Debug)]
pub struct FailureOutcome {
    pub artifacts_dir: PathBuf,
    pub resolution: Resolution,
    /// `None` when nothing was resolved and healing was skipped.
    pub healing: Option<HealReport>,
}

pub struct FailureHandler {
    config: AppConfig,
    oracles: Oracles,
    evaluator: Arc<dyn DomQueryEvaluator>,
    best_practices: String,
}

impl FailureHandler {
    pub fn new(config: AppConfig, oracles: Oracles) -> Self {
        Self {
            config,
            oracles,
            evaluator: Arc::new(XPathEvaluator::new()),
            best_practices: prompts::XPATH_BEST_PRACTICES.to_string(),
        }
    }

    /// Build from config: providers from `[llm]`, best practices from
    /// `healing.best_practices_file` when it is readable.
    pub async fn from_config(config: AppConfig) -> HealResult<Self> {
        let registry = ProviderRegistry::from_config(&config.llm);
        let oracles = Oracles::from_registry(&registry, Duration::from_secs(config.healing.oracle_timeout_secs))?;
        let mut handler = Self::new(config, oracles);
        if let Some(path) = handler.config.healing.best_practices_file.clone() {
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => handler.best_practices = text,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "best practices file unreadable, using built-in reference"),
            }
        }
        Ok(handler)
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn DomQueryEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::from_config(&self.config.resolution, Some(self.oracles.extract.clone()))
    }

    pub fn collector(&self) -> EvidenceCollector {
        EvidenceCollector::new(&self.config.healing.prefix_match_labels)
    }

    /// Handle one failed test. Every artifact is written before any healing
    /// error is returned.
    pub async fn handle(&self, page: &dyn RenderedPage, report: &FailureReport) -> HealResult<FailureOutcome> {
        let title = if report.title.is_empty() { "untitled" } else { report.title.as_str() };
        if let Some(status) = report.status.as_deref() {
            tracing::info!(title, status, "handling failed test");
        }

        let store = ArtifactStore::create(&self.config.artifacts.root, title, Utc::now()).await?;
        let trace = store.trace();

        let error_text = report.render();
        best_effort(store.write_error(&error_text).await, "error text");

        let markup = page.content().await;
        best_effort(store.write_dom(&markup, page.url().as_deref(), Utc::now()).await, "DOM snapshot");
        let markup = markup.unwrap_or_default();

        let detected = extract_page_labels(page).await;
        best_effort(store.write_labels(&detected).await, "field labels");
        best_effort(store.write_screenshot(page.screenshot_base64().await).await, "screenshot");
        trace
            .record("labels.extract", "done", json!({ "count": detected.len() }))
            .await;

        let evidence = FailureEvidence {
            error_text,
            test_title: title.to_string(),
            artifacts_dir: store.dir().to_path_buf(),
        };
        let resolution = self.resolver().resolve(&evidence).await;
        for attempt in &resolution.attempts {
            let outcome = if attempt.hit { "hit" } else { "miss" };
            trace
                .record(&format!("resolve.{}", attempt.strategy.as_str()), outcome, serde_json::Value::Null)
                .await;
        }

        let Some(resolved) = resolution.resolved.clone() else {
            trace.record("resolve", "unresolved", serde_json::Value::Null).await;
            tracing::warn!(dir = %store.dir().display(), "no locator file resolved; artifacts kept for review");
            return Ok(FailureOutcome {
                artifacts_dir: store.dir().to_path_buf(),
                resolution,
                healing: None,
            });
        };
        trace
            .record(
                "resolve",
                "resolved",
                json!({ "file": resolved.file.display().to_string(), "key": resolved.key, "strategy": resolved.strategy }),
            )
            .await;

        let healing = self
            .heal_resolved(&resolved.file, &markup, &detected, &store, &trace)
            .await?;
        Ok(FailureOutcome {
            artifacts_dir: store.dir().to_path_buf(),
            resolution,
            healing: Some(healing),
        })
    }

    async fn heal_resolved(
        &self,
        file: &Path,
        markup: &str,
        detected: &[String],
        store: &ArtifactStore,
        trace: &RunTrace,
    ) -> HealResult<HealReport> {
        let declared = match LocatorFile::load(file).await {
            Ok(f) => f.declared_labels(),
            Err(e) => {
                tracing::warn!(error = %e, "declared labels unavailable");
                Vec::new()
            }
        };
        let healed_map = LabelHealer::new(self.oracles.labels.clone(), &self.config.healing.protected_labels)
            .heal(&declared, detected)
            .await;
        let labels = apply_label_healing(&declared, &healed_map);
        trace
            .record("labels.heal", "done", json!({ "healed": healed_map }))
            .await;

        let collector = self.collector();
        if let Err(e) = collector
            .collect_to_file(markup, &labels, &store.path(EVIDENCE_FILE))
            .await
        {
            tracing::error!(error = %e, "UI evidence not saved; healing continues");
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<HealState>();
        let healer = LocatorHealer::new(
            self.oracles.repair.clone(),
            self.evaluator.clone(),
            collector,
            self.config.healing.max_retries,
        )
        .with_best_practices(self.best_practices.clone())
        .with_observer(tx);

        let result = healer.heal(file, markup, &labels).await;
        drop(healer);
        while let Some(state) = rx.recv().await {
            let detail = serde_json::to_value(&state).unwrap_or_default();
            trace.record("heal", state.name(), detail).await;
        }

        match &result {
            Ok(report) => trace.record("heal", "written", json!({ "changed": report.changed })).await,
            Err(e) => trace.record("heal", "failed", json!({ "error": e.to_string() })).await,
        }
        result
    }
}

fn best_effort<T>(result: HealResult<T>, what: &str) {
    if let Err(e) = result {
        tracing::warn!(artifact = what, error = %e, "artifact not written");
    }
}
