use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::labels::normalize_label;
use crate::llm::oracle::{strip_code_fences, RepairOracle};
use crate::llm::prompts;

const NO_MATCH: &str = "no match";

/// Re-aligns the labels a locator file declares with the labels the page shows.
pub struct LabelHealer {
    oracle: Arc<dyn RepairOracle>,
    protected: HashSet<String>,
}

impl LabelHealer {
    pub fn new(oracle: Arc<dyn RepairOracle>, protected: &[String]) -> Self {
        Self {
            oracle,
            protected: protected.iter().cloned().collect(),
        }
    }

    /// Returns `declared label → corrected label` for every label the oracle could re-map.
    ///
    /// Protected labels and labels already present on the page are never sent.
    /// Oracle failures leave the label as it was.
    pub async fn heal(&self, declared: &[String], detected: &[String]) -> HashMap<String, String> {
        let detected_norm: HashSet<String> = detected.iter().map(|l| normalize_label(l)).collect();
        let mut healed = HashMap::new();

        for label in declared {
            if self.protected.contains(label) {
                continue;
            }
            if detected_norm.contains(&normalize_label(label)) {
                continue;
            }

            let prompt = prompts::label_user_prompt(label, detected);
            match self.oracle.complete(prompts::LABEL_SYSTEM_PROMPT, &prompt).await {
                Ok(reply) => {
                    let suggestion = strip_code_fences(&reply).trim().trim_matches('"').trim();
                    if suggestion.is_empty() || suggestion.eq_ignore_ascii_case(NO_MATCH) {
                        tracing::debug!(label = %label, "label healer found no match");
                        continue;
                    }
                    tracing::info!(label = %label, healed = %suggestion, "label healed");
                    healed.insert(label.clone(), suggestion.to_string());
                }
                Err(e) => {
                    tracing::warn!(label = %label, error = %e, "label healing call failed");
                }
            }
        }

        healed
    }
}

/// Apply a heal map to the declared labels, keeping their order.
pub fn apply_label_healing(declared: &[String], healed: &HashMap<String, String>) -> Vec<String> {
    declared
        .iter()
        .map(|l| healed.get(l).cloned().unwrap_or_else(|| l.clone()))
        .collect()
}
