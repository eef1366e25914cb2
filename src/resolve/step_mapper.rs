//! Fallback resolution from the static step → locator-file mapping.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::VariantRule;
use crate::errors::{HealError, HealResult};
use crate::labels::read_labels_file;
use crate::resolve::disambiguate::{declared_label_sets, pick_best};

const DEFAULT_MAPPING_KEY: &str = "stepToLocatorMapping";
const LABELS_FILE: &str = "field-labels.md";

/// Ordered step name → candidate locator files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepMapping {
    steps: Vec<(String, Vec<String>)>,
}

impl StepMapping {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let steps = object
            .iter()
            .map(|(step, files)| {
                let files = files
                    .as_array()
                    .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                (step.clone(), files)
            })
            .collect();
        Some(Self { steps })
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Candidates of the step after `last_completed`.
    pub fn next_after(&self, last_completed: &str) -> Result<(&str, &[String]), MappingMiss> {
        let idx = self
            .steps
            .iter()
            .position(|(name, _)| same_step(name, last_completed))
            .ok_or_else(|| MappingMiss::UnknownStep(last_completed.to_string()))?;
        let (next, files) = self
            .steps
            .get(idx + 1)
            .ok_or_else(|| MappingMiss::NoNextStep(last_completed.to_string()))?;
        if files.is_empty() {
            return Err(MappingMiss::NoCandidates(next.clone()));
        }
        Ok((next.as_str(), files.as_slice()))
    }
}

/// The mapping file: the default mapping plus named variants.
#[derive(Debug, Clone, Default)]
pub struct StepMappingFile {
    default: StepMapping,
    variants: Vec<(String, StepMapping)>,
}

impl StepMappingFile {
    pub fn parse(json: &str) -> HealResult<Self> {
        let root: Value = serde_json::from_str(json)?;
        let object = root
            .as_object()
            .ok_or_else(|| HealError::Config("step mapping must be a JSON object".into()))?;
        let default = object
            .get(DEFAULT_MAPPING_KEY)
            .and_then(StepMapping::from_value)
            .ok_or_else(|| HealError::Config(format!("step mapping lacks \"{DEFAULT_MAPPING_KEY}\"")))?;
        let variants = object
            .iter()
            .filter(|(name, _)| name.as_str() != DEFAULT_MAPPING_KEY)
            .filter_map(|(name, value)| StepMapping::from_value(value).map(|m| (name.clone(), m)))
            .collect();
        Ok(Self { default, variants })
    }

    pub async fn load(path: &Path) -> HealResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// The variant named by the first rule whose marker occurs in `title`, else the default.
    pub fn select(&self, title: &str, rules: &[VariantRule]) -> &StepMapping {
        for rule in rules {
            if !title.contains(&rule.title_contains) {
                continue;
            }
            match self.variants.iter().find(|(name, _)| *name == rule.mapping) {
                Some((name, mapping)) => {
                    tracing::debug!(variant = %name, "step mapping variant selected");
                    return mapping;
                }
                None => tracing::warn!(variant = %rule.mapping, "step mapping variant not defined"),
            }
        }
        &self.default
    }
}

/// Why the mapping could not name a failing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingMiss {
    MappingUnavailable,
    NoCompletedSteps,
    UnknownStep(String),
    NoNextStep(String),
    NoCandidates(String),
}

/// Completed step names from `- Step ... (` lines, first-seen order, de-duplicated.
pub fn completed_steps(error_text: &str) -> Vec<String> {
    let mut steps: Vec<String> = Vec::new();
    for line in error_text.lines() {
        let Some(item) = line.trim().strip_prefix("- ") else {
            continue;
        };
        if !item.starts_with("Step ") {
            continue;
        }
        let Some(end) = item.find('(') else {
            continue;
        };
        let name = item[..end].trim();
        if !name.is_empty() && !steps.iter().any(|s| s == name) {
            steps.push(name.to_string());
        }
    }
    steps
}

/// Step names compare with an optional leading `Step ` and ignoring case.
fn same_step(a: &str, b: &str) -> bool {
    let bare = |s: &str| {
        let s = s.trim();
        s.strip_prefix("Step ").unwrap_or(s).trim().to_lowercase()
    };
    bare(a) == bare(b)
}

pub struct StepMapper {
    mapping_path: PathBuf,
    variants: Vec<VariantRule>,
    project_root: PathBuf,
}

impl StepMapper {
    pub fn new(mapping_path: impl Into<PathBuf>, variants: Vec<VariantRule>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            mapping_path: mapping_path.into(),
            variants,
            project_root: project_root.into(),
        }
    }

    /// Failing step and its candidate locator files, in mapping order.
    pub async fn candidates(&self, error_text: &str, title: &str) -> Result<(String, Vec<String>), MappingMiss> {
        let file = StepMappingFile::load(&self.mapping_path).await.map_err(|e| {
            tracing::warn!(path = %self.mapping_path.display(), error = %e, "step mapping unavailable");
            MappingMiss::MappingUnavailable
        })?;
        let steps = completed_steps(error_text);
        let last = steps.last().ok_or(MappingMiss::NoCompletedSteps)?;
        let (next, files) = file.select(title, &self.variants).next_after(last)?;
        tracing::info!(last_completed = %last, failing_step = %next, candidates = files.len(), "step mapping hit");
        Ok((next.to_string(), files.to_vec()))
    }

    /// Resolve to a single locator file (relative to the project root),
    /// disambiguating with the labels saved in `artifacts_dir`.
    pub async fn resolve_detailed(&self, error_text: &str, title: &str, artifacts_dir: &Path) -> Result<String, MappingMiss> {
        let (_, candidates) = self.candidates(error_text, title).await?;
        if candidates.len() == 1 {
            return Ok(candidates[0].clone());
        }
        let page_labels = read_labels_file(&artifacts_dir.join(LABELS_FILE)).await;
        let declared = declared_label_sets(&candidates, &self.project_root).await;
        let best = pick_best(&candidates, &page_labels, &declared)
            .cloned()
            .ok_or(MappingMiss::NoCandidates(String::new()))?;
        tracing::info!(chosen = %best, of = candidates.len(), "candidate disambiguated");
        Ok(best)
    }

    pub async fn resolve(&self, error_text: &str, title: &str, artifacts_dir: &Path) -> Option<String> {
        match self.resolve_detailed(error_text, title, artifacts_dir).await {
            Ok(file) => Some(file),
            Err(miss) => {
                tracing::debug!(?miss, "step mapping missed");
                None
            }
        }
    }
}
