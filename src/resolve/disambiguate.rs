use std::collections::HashMap;
use std::path::Path;

use crate::labels::normalize_label;
use crate::locator::LocatorFile;

/// Number of page labels that substring-match (either direction) any declared label.
pub fn overlap_score(page_labels: &[String], declared: &[String]) -> usize {
    let declared: Vec<String> = declared
        .iter()
        .map(|l| normalize_label(l))
        .filter(|l| !l.is_empty())
        .collect();
    page_labels
        .iter()
        .map(|l| normalize_label(l))
        .filter(|page| !page.is_empty())
        .filter(|page| {
            declared
                .iter()
                .any(|decl| decl.contains(page.as_str()) || page.contains(decl.as_str()))
        })
        .count()
}

/// Pick the candidate whose declared labels best match the page.
///
/// A single candidate is returned unscored. Ties, including an all-zero
/// board, go to the earliest candidate.
pub fn pick_best<'a>(
    candidates: &'a [String],
    page_labels: &[String],
    declared: &HashMap<String, Vec<String>>,
) -> Option<&'a String> {
    if candidates.len() <= 1 {
        return candidates.first();
    }

    let mut best: Option<(&String, usize)> = None;
    for candidate in candidates {
        let score = declared
            .get(candidate)
            .map(|labels| overlap_score(page_labels, labels))
            .unwrap_or(0);
        tracing::debug!(candidate = %candidate, score, "candidate scored");
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Declared label sets of each candidate file, resolved against `project_root`.
/// Unreadable files contribute an empty set.
pub async fn declared_label_sets(candidates: &[String], project_root: &Path) -> HashMap<String, Vec<String>> {
    let mut sets = HashMap::new();
    for candidate in candidates {
        let labels = match LocatorFile::load(&project_root.join(candidate)).await {
            Ok(file) => file.declared_labels(),
            Err(e) => {
                tracing::warn!(candidate = %candidate, error = %e, "candidate locator file unreadable");
                Vec::new()
            }
        };
        sets.insert(candidate.clone(), labels);
    }
    sets
}
