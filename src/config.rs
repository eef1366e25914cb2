use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{HealError, HealResult};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint, including any query string the deployment needs.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var LOCATOR_HEAL_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Send the key in this header (e.g. `api-key`) instead of `Authorization: Bearer`.
    #[serde(default)]
    pub api_key_header: Option<String>,
}

/// Maps oracle roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Proposes corrected locator expressions.
    pub repair: Option<RoleEntry>,
    /// Pulls the raw query expression out of error output.
    pub extract: Option<RoleEntry>,
    /// Verifies declared field labels against the rendered page.
    pub labels: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Use SSE streaming.
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    /// Directory (relative to project_root) holding the locator-definition files.
    #[serde(default = "default_locators_dir")]
    pub locators_dir: PathBuf,
    #[serde(default = "default_locator_extensions")]
    pub locator_extensions: Vec<String>,
    /// Suffix identifying page-object sources in stack frames.
    #[serde(default = "default_page_object_suffix")]
    pub page_object_suffix: String,
    /// Appended to extension-less import paths.
    #[serde(default = "default_import_extension")]
    pub default_import_extension: String,
    /// Step mapping JSON, relative to project_root.
    #[serde(default = "default_step_mapping_file")]
    pub step_mapping_file: PathBuf,
    #[serde(default = "default_variants")]
    pub variants: Vec<VariantRule>,
}

/// Selects a named step-mapping variant when the test title contains a marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRule {
    pub title_contains: String,
    pub mapping: String,
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_locators_dir() -> PathBuf {
    PathBuf::from("src/locators")
}

fn default_locator_extensions() -> Vec<String> {
    vec!["ts".into(), "js".into()]
}

fn default_page_object_suffix() -> String {
    ".page.ts".into()
}

fn default_import_extension() -> String {
    "ts".into()
}

fn default_step_mapping_file() -> PathBuf {
    PathBuf::from("locatorFinder.json")
}

fn default_variants() -> Vec<VariantRule> {
    vec![VariantRule {
        title_contains: "Home Page validation".into(),
        mapping: "homePageValidationTest".into(),
    }]
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            locators_dir: default_locators_dir(),
            locator_extensions: default_locator_extensions(),
            page_object_suffix: default_page_object_suffix(),
            default_import_extension: default_import_extension(),
            step_mapping_file: default_step_mapping_file(),
            variants: default_variants(),
        }
    }
}

impl ResolutionConfig {
    pub fn locators_path(&self) -> PathBuf {
        self.project_root.join(&self.locators_dir)
    }

    pub fn step_mapping_path(&self) -> PathBuf {
        self.project_root.join(&self.step_mapping_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_oracle_timeout")]
    pub oracle_timeout_secs: u64,
    /// Replaces the embedded XPath best-practices reference when set.
    #[serde(default)]
    pub best_practices_file: Option<PathBuf>,
    /// Labels that match any element whose text starts with them (split button text).
    #[serde(default = "default_prefix_labels")]
    pub prefix_match_labels: Vec<String>,
    /// Canonical labels the label healer never rewrites.
    #[serde(default)]
    pub protected_labels: Vec<String>,
}

fn default_max_retries() -> u32 {
    4
}

fn default_oracle_timeout() -> u64 {
    120
}

fn default_prefix_labels() -> Vec<String> {
    vec!["save".into()]
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            oracle_timeout_secs: default_oracle_timeout(),
            best_practices_file: None,
            prefix_match_labels: default_prefix_labels(),
            protected_labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifacts_root")]
    pub root: PathBuf,
}

fn default_artifacts_root() -> PathBuf {
    PathBuf::from("failures")
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: default_artifacts_root(),
        }
    }
}

fn resolve_config_path() -> HealResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("locator-heal").join(CONFIG_FILE);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(HealError::Config(format!(
        "{CONFIG_FILE} not found next to executable, in working directory or user config dir"
    )))
}

/// Load the config from an explicit path, or search the usual locations.
pub fn load_config(explicit: Option<&Path>) -> HealResult<AppConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => resolve_config_path()?,
    };
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn parse_config(content: &str) -> HealResult<AppConfig> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.healing.max_retries, 4);
        assert_eq!(cfg.healing.prefix_match_labels, vec!["save".to_string()]);
        assert_eq!(cfg.resolution.step_mapping_file, PathBuf::from("locatorFinder.json"));
        assert_eq!(cfg.resolution.variants[0].mapping, "homePageValidationTest");
        assert_eq!(cfg.artifacts.root, PathBuf::from("failures"));
    }

    #[test]
    fn parses_providers_and_roles() {
        let cfg = parse_config(
            r#"
            [llm]
            active_provider = "azure"

            [llm.providers.azure]
            display_name = "Azure OpenAI"
            api_base = "https://example.invalid/chat/completions?api-version=2024-02-01"
            model = "gpt-4"
            api_key_header = "api-key"

            [llm.roles.repair]
            provider = "azure"
            model = "gpt-4o"
            temperature = 0.0

            [healing]
            max_retries = 2
            protected_labels = ["Invoice Number"]
            "#,
        )
        .unwrap();

        let azure = &cfg.llm.providers["azure"];
        assert_eq!(azure.temperature, 0.2);
        assert_eq!(azure.api_key_header.as_deref(), Some("api-key"));
        let repair = cfg.llm.roles.repair.as_ref().unwrap();
        assert_eq!(repair.model, "gpt-4o");
        assert!(!repair.stream);
        assert_eq!(cfg.healing.max_retries, 2);
        assert_eq!(cfg.healing.oracle_timeout_secs, 120);
        assert_eq!(cfg.healing.protected_labels, vec!["Invoice Number".to_string()]);
    }

    #[test]
    fn paths_are_joined_to_project_root() {
        let cfg = parse_config("[resolution]\nproject_root = \"/work/app\"\n").unwrap();
        assert_eq!(
            cfg.resolution.step_mapping_path(),
            PathBuf::from("/work/app/locatorFinder.json")
        );
        assert_eq!(
            cfg.resolution.locators_path(),
            PathBuf::from("/work/app/src/locators")
        );
    }
}
