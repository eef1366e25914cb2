//! Failure payload produced by the test harness, and its free-text rendering.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::HealResult;

pub const REPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureReport {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub title: String,
    /// Harness status, e.g. `failed` or `timedOut`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
    #[serde(default)]
    pub results: Vec<TestResult>,
    #[serde(default)]
    pub stdout: Vec<String>,
    #[serde(default)]
    pub stderr: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

fn default_version() -> u32 {
    REPORT_VERSION
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub location: Option<SourceLocation>,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepRecord {
    pub title: String,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "contentType", alias = "content_type")]
    pub content_type: String,
    #[serde(default)]
    pub path: Option<String>,
}

impl FailureReport {
    pub async fn load(path: &Path) -> HealResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let report: FailureReport = serde_json::from_str(&content)?;
        if report.version > REPORT_VERSION {
            tracing::warn!(
                version = report.version,
                supported = REPORT_VERSION,
                "failure report is newer than this tool; unknown fields are ignored"
            );
        }
        Ok(report)
    }

    /// Render the report as the free-text error artifact.
    pub fn render(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        for (idx, err) in self.errors.iter().enumerate() {
            sections.push(format!(
                "=== Basic Error {} ===\nMessage: {}\nStack: {}",
                idx + 1,
                err.message.as_deref().unwrap_or("N/A"),
                err.stack.as_deref().unwrap_or("N/A"),
            ));
        }

        for (r, result) in self.results.iter().enumerate() {
            for (e, err) in result.errors.iter().enumerate() {
                sections.push(render_detail(&format!("Detailed Error {}.{}", r + 1, e + 1), err, true));
            }
            if let Some(err) = &result.error {
                sections.push(render_detail(&format!("Result Error {}", r + 1), err, false));
            }
            for (s, step) in result.steps.iter().enumerate() {
                if let Some(err) = &step.error {
                    let header = format!("Step Error {}.{}: \"{}\"", r + 1, s + 1, step.title);
                    sections.push(render_detail(&header, err, true));
                }
            }
        }

        if !self.stdout.is_empty() {
            sections.push(format!("\n=== STDOUT ===\n{}\n", self.stdout.join("\n")));
        }
        if !self.stderr.is_empty() {
            sections.push(format!("\n=== STDERR ===\n{}\n", self.stderr.join("\n")));
        }

        if !self.attachments.is_empty() {
            let mut block = String::from("\n=== Attachments ===\n");
            for att in &self.attachments {
                let _ = writeln!(
                    block,
                    "- {} ({}) at {}",
                    att.name,
                    att.content_type,
                    att.path.as_deref().unwrap_or("in-memory")
                );
            }
            sections.push(block);
        }

        if sections.is_empty() {
            return "No error details available".to_string();
        }
        sections.join("\n")
    }
}

fn render_detail(header: &str, err: &ErrorDetail, with_snippet: bool) -> String {
    let message = err.message.as_deref().unwrap_or("N/A");
    let mut out = format!("\n=== {header} ===\nMessage:\n{message}\n\n");
    if let Some(stack) = err.stack.as_deref().filter(|s| *s != message) {
        let _ = write!(out, "Stack Trace:\n{stack}\n\n");
    }
    if let Some(loc) = &err.location {
        let _ = write!(out, "Location: {}:{}:{}\n\n", loc.file, loc.line, loc.column);
    }
    if with_snippet {
        if let Some(snippet) = &err.snippet {
            let _ = write!(out, "Code Snippet:\n{snippet}\n\n");
        }
    }
    out
}
