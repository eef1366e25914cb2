use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};

use crate::page::RenderedPage;

/// Page script collecting field-like labels from the live document.
pub const FIELD_LABELS_SCRIPT: &str = include_str!("../../scripts/field_labels.js");

const MIN_TEXT_NODE_LEN: usize = 3;
const MAX_TEXT_NODE_LEN: usize = 47;

/// Insertion-ordered, de-duplicated label list.
#[derive(Debug, Default)]
struct LabelList {
    seen: HashSet<String>,
    labels: Vec<String>,
}

impl LabelList {
    fn add(&mut self, value: &str) {
        let value = value.trim();
        if value.is_empty() || self.seen.contains(value) {
            return;
        }
        self.seen.insert(value.to_string());
        self.labels.push(value.to_string());
    }
}

/// Collect the visible field labels of a rendered page.
///
/// Runs the label script in the page; when the page cannot run scripts the
/// same rules are applied to its serialized markup.
pub async fn extract_page_labels(page: &dyn RenderedPage) -> Vec<String> {
    match page.evaluate(FIELD_LABELS_SCRIPT).await {
        Ok(value) => match serde_json::from_value::<Vec<String>>(value) {
            Ok(labels) => {
                tracing::info!(count = labels.len(), "field labels extracted from live page");
                return labels;
            }
            Err(e) => tracing::warn!(error = %e, "label script returned an unexpected shape"),
        },
        Err(e) => tracing::debug!(error = %e, "label script unavailable, reading markup instead"),
    }

    match page.content().await {
        Ok(markup) => {
            let labels = labels_from_markup(&markup);
            tracing::info!(count = labels.len(), "field labels extracted from markup");
            labels
        }
        Err(e) => {
            tracing::warn!(error = %e, "page markup unavailable, no labels detected");
            Vec::new()
        }
    }
}

/// Static version of the label script, applied to already-rendered markup.
pub fn labels_from_markup(markup: &str) -> Vec<String> {
    let doc = Html::parse_document(markup);
    let mut list = LabelList::default();

    for el in select_all(&doc, "label") {
        list.add(&inner_text(el));
    }

    for el in select_all(&doc, "input, textarea, select") {
        for attr in ["placeholder", "title", "aria-label"] {
            if let Some(value) = el.value().attr(attr) {
                list.add(value);
            }
        }
    }

    for el in select_all(&doc, "button") {
        list.add(&inner_text(el));
        for attr in ["title", "aria-label"] {
            if let Some(value) = el.value().attr(attr) {
                list.add(value);
            }
        }
    }

    for el in select_all(&doc, "th") {
        list.add(&inner_text(el));
    }

    if let Some(body) = select_all(&doc, "body").into_iter().next() {
        for node in body.descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let Some(parent) = node.parent().and_then(ElementRef::wrap) else {
                continue;
            };
            if parent.id() == body.id() || matches!(parent.value().name(), "script" | "style" | "noscript") {
                continue;
            }
            let trimmed = text.trim();
            let len = trimmed.chars().count();
            if (MIN_TEXT_NODE_LEN..=MAX_TEXT_NODE_LEN).contains(&len) {
                list.add(trimmed);
            }
        }
    }

    list.labels
}

fn select_all<'a>(doc: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => doc.select(&selector).collect(),
        Err(e) => {
            tracing::warn!(selector = css, error = ?e, "invalid selector");
            Vec::new()
        }
    }
}

/// Text content with whitespace runs collapsed.
pub(crate) fn inner_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
