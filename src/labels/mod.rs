//! Field labels: human-readable names of UI controls used as matching evidence.

pub mod extract;
pub mod heal;

use std::path::Path;

use crate::errors::HealResult;

/// Case/whitespace normalization applied before any label comparison.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Render detected labels in the `field-labels.md` format.
pub fn render_labels_markdown(labels: &[String]) -> String {
    let mut out = String::from("# Extracted Field Labels\n\n");
    for label in labels {
        out.push_str("- ");
        out.push_str(label);
        out.push('\n');
    }
    out
}

/// Parse a `field-labels.md` body: list items, or comma-separated plain lines.
pub fn parse_labels_markdown(content: &str) -> Vec<String> {
    let mut labels = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(item) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
            labels.push(item.trim().to_string());
        } else {
            labels.extend(line.split(',').map(str::trim).map(str::to_string));
        }
    }
    labels.retain(|l| !l.is_empty());
    labels
}

/// Read a saved label file. A missing or unreadable file yields no labels.
pub async fn read_labels_file(path: &Path) -> Vec<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_labels_markdown(&content),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "field label file unavailable");
            Vec::new()
        }
    }
}

pub async fn write_labels_file(path: &Path, labels: &[String]) -> HealResult<()> {
    tokio::fs::write(path, render_labels_markdown(labels)).await?;
    tracing::debug!(path = %path.display(), count = labels.len(), "field labels saved");
    Ok(())
}
