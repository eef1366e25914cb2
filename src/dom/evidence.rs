use std::path::Path;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::errors::HealResult;
use crate::labels::extract::inner_text;
use crate::labels::normalize_label;

/// Element kinds searched for label matches.
const CANDIDATE_SELECTOR: &str = "input, textarea, button, label, a, span";

/// Elements following a match, in document order, kept as context.
const NEARBY_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementMatch {
    #[serde(rename = "element_outerHTML")]
    pub element: String,
    /// Empty when the element has no parent element.
    #[serde(rename = "parent_outerHTML")]
    pub parent: String,
    #[serde(rename = "child_elements")]
    pub descendants: Vec<String>,
    #[serde(rename = "nearby_elements")]
    pub nearby: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEvidence {
    pub label: String,
    pub matches: Vec<ElementMatch>,
}

/// Per-label DOM matches handed to the repair oracle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UiEvidence {
    pub labels: Vec<LabelEvidence>,
}

impl UiEvidence {
    pub fn match_count(&self) -> usize {
        self.labels.iter().map(|l| l.matches.len()).sum()
    }
}

/// Finds DOM elements matching field labels in a static snapshot.
#[derive(Debug, Clone)]
pub struct EvidenceCollector {
    /// Normalized labels matched by text prefix instead of equality.
    prefix_labels: Vec<String>,
}

impl Default for EvidenceCollector {
    fn default() -> Self {
        Self::new(&["save".to_string()])
    }
}

impl EvidenceCollector {
    pub fn new(prefix_labels: &[String]) -> Self {
        Self {
            prefix_labels: prefix_labels.iter().map(|l| normalize_label(l)).collect(),
        }
    }

    pub fn collect(&self, markup: &str, labels: &[String]) -> UiEvidence {
        let doc = Html::parse_document(markup);
        let normalized: Vec<String> = labels.iter().map(|l| normalize_label(l)).collect();
        let mut evidence = UiEvidence {
            labels: labels
                .iter()
                .map(|label| LabelEvidence {
                    label: label.clone(),
                    matches: Vec::new(),
                })
                .collect(),
        };

        let Ok(candidates) = Selector::parse(CANDIDATE_SELECTOR) else {
            return evidence;
        };
        let walk_order = body_element_order(&doc);

        for el in doc.select(&candidates) {
            let text = normalize_label(&inner_text(el));
            let attr = |name: &str| el.value().attr(name).map(normalize_label).unwrap_or_default();
            let title = attr("title");
            let aria = attr("aria-label");
            let placeholder = attr("placeholder");

            for (idx, norm) in normalized.iter().enumerate() {
                if norm.is_empty() {
                    continue;
                }
                let prefix_hit = self.prefix_labels.contains(norm) && text.starts_with(norm.as_str());
                let hit = prefix_hit || [&text, &title, &aria, &placeholder].iter().any(|v| *v == norm);
                if hit {
                    evidence.labels[idx].matches.push(describe_match(el, &walk_order));
                }
            }
        }

        evidence
    }

    /// Collect evidence and write it as pretty JSON to `out_path`.
    pub async fn collect_to_file(&self, markup: &str, labels: &[String], out_path: &Path) -> HealResult<UiEvidence> {
        let evidence = self.collect(markup, labels);
        if let Some(dir) = out_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(out_path, serde_json::to_string_pretty(&evidence)?).await?;
        tracing::info!(
            path = %out_path.display(),
            labels = labels.len(),
            matches = evidence.match_count(),
            "UI evidence saved"
        );
        Ok(evidence)
    }
}

/// Elements under `<body>` in document order, `<body>` itself excluded.
fn body_element_order(doc: &Html) -> Vec<ElementRef<'_>> {
    let Ok(body_sel) = Selector::parse("body") else {
        return Vec::new();
    };
    doc.select(&body_sel)
        .next()
        .map(|body| body.descendants().skip(1).filter_map(ElementRef::wrap).collect())
        .unwrap_or_default()
}

fn describe_match(el: ElementRef<'_>, walk_order: &[ElementRef<'_>]) -> ElementMatch {
    let parent = el
        .parent()
        .and_then(ElementRef::wrap)
        .map(|p| p.html())
        .unwrap_or_default();
    let descendants = el
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .map(|d| d.html())
        .collect();
    let nearby = walk_order
        .iter()
        .position(|candidate| candidate.id() == el.id())
        .map(|pos| {
            walk_order[pos + 1..]
                .iter()
                .take(NEARBY_COUNT)
                .map(|n| n.html())
                .collect()
        })
        .unwrap_or_default();

    ElementMatch {
        element: el.html(),
        parent,
        descendants,
        nearby,
    }
}
