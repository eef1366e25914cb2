//! Oracle-assisted resolution: pull the raw XPath out of the error text, then
//! find the locator file that declares it.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use futures_util::stream::{self, Stream, StreamExt};
use regex::Regex;

use crate::llm::oracle::strip_code_fences;

static XPATH_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""xpath=([^"]+)""#).expect("xpath literal regex"));

/// Turn an extraction reply into a bare XPath body. Empty replies yield `None`.
pub fn clean_extracted_locator(reply: &str) -> Option<String> {
    let mut text = strip_code_fences(reply).trim();
    if let Some(inner) = text.strip_prefix("locator(").and_then(|t| t.strip_suffix(')')) {
        text = inner.trim();
    }
    let quoted = text.len() >= 2
        && text
            .chars()
            .next()
            .is_some_and(|c| matches!(c, '\'' | '"' | '`'))
        && text.chars().last() == text.chars().next();
    if quoted {
        text = &text[1..text.len() - 1];
    }
    let text = text.trim();
    let body = text.strip_prefix("xpath=").unwrap_or(text).trim();
    if body.is_empty() {
        return None;
    }
    // Locator files quote with `"`, so any inner `"` was written as `'`
    Some(body.replace('"', "'"))
}

/// First file under `dir` (sorted walk) with a `"xpath=<body>"` literal equal to `body`.
pub async fn find_file_with_xpath(dir: &Path, extensions: &[String], body: &str) -> Option<PathBuf> {
    let mut files = Vec::new();
    if let Err(e) = collect_files(dir, extensions, &mut files).await {
        tracing::warn!(dir = %dir.display(), error = %e, "locator directory walk failed");
    }
    for path in files {
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            tracing::debug!(path = %path.display(), "skipping unreadable file");
            continue;
        };
        let hit = XPATH_LITERAL_RE
            .captures_iter(&content)
            .filter_map(|caps| caps.get(1))
            .any(|m| m.as_str() == body);
        if hit {
            tracing::info!(path = %path.display(), "extracted xpath found in locator file");
            return Some(path);
        }
    }
    None
}

async fn collect_files(dir: &Path, extensions: &[String], out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let entries = tokio::fs::read_dir(dir).await?;
    let listing = stream::unfold(entries, |mut entries| async move {
        let next = entries.next_entry().await.transpose()?;
        Some((next.map(|entry| entry.path()), entries))
    });
    let mut paths = drain_entries(dir, listing).await;
    paths.sort();

    for path in paths {
        if path.is_dir() {
            Box::pin(collect_files(&path, extensions, out)).await?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e == ext))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Entries up to the end of the listing or the first read error.
async fn drain_entries(dir: &Path, listing: impl Stream<Item = std::io::Result<PathBuf>>) -> Vec<PathBuf> {
    let mut listing = std::pin::pin!(listing);
    let mut paths = Vec::new();
    while let Some(next) = listing.next().await {
        match next {
            Ok(path) => paths.push(path),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "directory listing stopped early");
                break;
            }
        }
    }
    paths
}
