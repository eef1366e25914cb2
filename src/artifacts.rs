//! Per-failure artifact directory and the JSONL run trace kept inside it.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::errors::{HealError, HealResult};
use crate::labels::write_labels_file;

pub const ERROR_FILE: &str = "full-error.txt";
pub const DOM_FILE: &str = "faileddom.html";
pub const LABELS_FILE: &str = "field-labels.md";
pub const EVIDENCE_FILE: &str = "ui-elements.json";
pub const SCREENSHOT_FILE: &str = "failedscreenshot.png";
pub const TRACE_FILE: &str = "trace.jsonl";

/// Every character outside `[A-Za-z0-9_-]` becomes `_`.
pub fn safe_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// RFC 3339 with millisecond precision, `:` and `.` replaced so it is path-safe.
pub fn timestamp_slug(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true).replace([':', '.'], "-")
}

/// The directory holding one failure's artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Create `<root>/<safe_title>_<timestamp>`, adding `_2`, `_3`, ... when
    /// another failure already claimed that name.
    pub async fn create(root: &Path, title: &str, now: DateTime<Utc>) -> HealResult<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| HealError::Artifact(format!("cannot create {}: {e}", root.display())))?;

        let base = format!("{}_{}", safe_title(title), timestamp_slug(now));
        let mut n = 1u32;
        loop {
            let dir = if n == 1 { root.join(&base) } else { root.join(format!("{base}_{n}")) };
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    tracing::info!(dir = %dir.display(), "artifacts directory created");
                    return Ok(Self { dir });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => {
                    return Err(HealError::Artifact(format!("cannot create {}: {e}", dir.display())));
                }
            }
        }
    }

    /// Use an existing directory as the store.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub async fn write_error(&self, text: &str) -> HealResult<PathBuf> {
        let path = self.path(ERROR_FILE);
        tokio::fs::write(&path, text).await?;
        tracing::debug!(path = %path.display(), "error text saved");
        Ok(path)
    }

    /// Save the DOM snapshot behind a metadata comment, or a comment naming
    /// why capture failed.
    pub async fn write_dom(&self, captured: &HealResult<String>, url: Option<&str>, at: DateTime<Utc>) -> HealResult<PathBuf> {
        let body = match captured {
            Ok(markup) => format!(
                "<!--\nURL: {}\nCaptured: {}\n-->\n{markup}",
                url.unwrap_or("unknown"),
                at.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            Err(e) => format!("<!-- Could not capture DOM: {e} -->"),
        };
        let path = self.path(DOM_FILE);
        tokio::fs::write(&path, body).await?;
        tracing::debug!(path = %path.display(), captured = captured.is_ok(), "DOM snapshot saved");
        Ok(path)
    }

    pub async fn write_labels(&self, labels: &[String]) -> HealResult<PathBuf> {
        let path = self.path(LABELS_FILE);
        write_labels_file(&path, labels).await?;
        Ok(path)
    }

    /// Decode and save the screenshot; any failure leaves an empty placeholder.
    pub async fn write_screenshot(&self, captured: HealResult<String>) -> HealResult<PathBuf> {
        let path = self.path(SCREENSHOT_FILE);
        let bytes = captured.and_then(|b64| {
            base64::engine::general_purpose::STANDARD
                .decode(b64.trim())
                .map_err(|e| HealError::Page(format!("screenshot is not base64: {e}")))
        });
        match bytes {
            Ok(bytes) => {
                tokio::fs::write(&path, bytes).await?;
                tracing::debug!(path = %path.display(), "screenshot saved");
            }
            Err(e) => {
                tracing::warn!(error = %e, "screenshot capture failed, writing empty placeholder");
                tokio::fs::write(&path, b"").await?;
            }
        }
        Ok(path)
    }

    pub fn trace(&self) -> RunTrace {
        RunTrace::new(self.path(TRACE_FILE))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Unix epoch milliseconds.
    pub ts: i64,
    pub run_id: String,
    pub stage: String,
    pub outcome: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Append-only JSONL record of what each stage of a run did.
#[derive(Debug, Clone)]
pub struct RunTrace {
    pub run_id: String,
    file_path: PathBuf,
}

impl RunTrace {
    pub fn new(file_path: PathBuf) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            file_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append one entry. Trace failures are logged and never interrupt a run.
    pub async fn record(&self, stage: &str, outcome: &str, detail: serde_json::Value) {
        let entry = TraceEntry {
            ts: Utc::now().timestamp_millis(),
            run_id: self.run_id.clone(),
            stage: stage.to_string(),
            outcome: outcome.to_string(),
            detail,
        };
        if let Err(e) = self.append(&entry).await {
            tracing::warn!(path = %self.file_path.display(), error = %e, "trace entry not written");
        }
    }

    async fn append(&self, entry: &TraceEntry) -> HealResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        tracing::debug!(path = %self.file_path.display(), stage = %entry.stage, "trace entry flushed");
        Ok(())
    }

    pub async fn entries(&self) -> HealResult<Vec<TraceEntry>> {
        let content = tokio::fs::read_to_string(&self.file_path).await?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(HealError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 5, 1, 17, 19).unwrap() + chrono::Duration::milliseconds(297)
    }

    #[test]
    fn directory_naming() {
        assert_eq!(safe_title("Invoice creation: UI/flow #2"), "Invoice_creation__UI_flow__2");
        assert_eq!(timestamp_slug(at()), "2025-08-05T01-17-19-297Z");
    }

    #[tokio::test]
    async fn writes_every_artifact() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(root.path(), "Invoice creation UI", at()).await.unwrap();
        assert!(store.dir().ends_with("Invoice_creation_UI_2025-08-05T01-17-19-297Z"));

        store.write_error("boom").await.unwrap();
        store
            .write_dom(&Ok("<html></html>".into()), Some("https://app/x"), at())
            .await
            .unwrap();
        store.write_labels(&["Supplier".to_string()]).await.unwrap();
        store
            .write_screenshot(Ok(base64::engine::general_purpose::STANDARD.encode([137u8, 80, 78, 71])))
            .await
            .unwrap();

        let dom = std::fs::read_to_string(store.path(DOM_FILE)).unwrap();
        assert!(dom.starts_with("<!--\nURL: https://app/x\nCaptured: 2025-08-05T01:17:19.297Z\n-->\n<html>"));
        assert_eq!(std::fs::read(store.path(SCREENSHOT_FILE)).unwrap(), vec![137u8, 80, 78, 71]);
        assert!(std::fs::read_to_string(store.path(LABELS_FILE)).unwrap().contains("- Supplier"));
    }

    #[tokio::test]
    async fn same_title_and_instant_get_separate_directories() {
        let root = tempfile::tempdir().unwrap();
        let first = ArtifactStore::create(root.path(), "Invoice creation UI", at()).await.unwrap();
        let second = ArtifactStore::create(root.path(), "Invoice creation UI", at()).await.unwrap();
        assert_ne!(first.dir(), second.dir());
        assert!(second.dir().ends_with("Invoice_creation_UI_2025-08-05T01-17-19-297Z_2"));
    }

    #[tokio::test]
    async fn capture_failures_leave_placeholders() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(root.path(), "t", at()).await.unwrap();
        store
            .write_dom(&Err(HealError::Page("page closed".into())), None, at())
            .await
            .unwrap();
        store.write_screenshot(Err(HealError::Page("closed".into()))).await.unwrap();
        store.write_screenshot(Ok("%%%".into())).await.unwrap();

        let dom = std::fs::read_to_string(store.path(DOM_FILE)).unwrap();
        assert_eq!(dom, "<!-- Could not capture DOM: Page error: page closed -->");
        assert!(std::fs::read(store.path(SCREENSHOT_FILE)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn trace_appends_jsonl() {
        let root = tempfile::tempdir().unwrap();
        let trace = ArtifactStore::open(root.path()).trace();
        trace.record("resolve.static_trace", "miss", serde_json::Value::Null).await;
        trace
            .record("resolve.step_mapping", "hit", serde_json::json!({ "file": "a.ts" }))
            .await;
        let entries = trace.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].detail["file"], "a.ts");
        assert!(entries.iter().all(|e| e.run_id == trace.run_id));
    }
}
