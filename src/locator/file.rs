use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{HealError, HealResult};
use crate::locator::{LocatorExpression, LocatorSet};

static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^\s*(\w+)\s*:\s*"(xpath=[^"]*)""#).expect("entry regex"));

static LABELS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:fieldlabels|feildlabels)\s*:\s*['"]([^'"]*)['"]"#).expect("labels regex")
});

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    /// Byte range of the quoted expression, quotes excluded.
    span: Range<usize>,
    expression: LocatorExpression,
}

#[derive(Debug, Clone)]
struct LabelDecl {
    span: Range<usize>,
    labels: Vec<String>,
}

/// A parsed locator-definition file.
///
/// Keeps the original text so a rewrite only touches the quoted expression of
/// each healed key and the quoted field-label list.
#[derive(Debug, Clone)]
pub struct LocatorFile {
    path: PathBuf,
    text: String,
    entries: Vec<Entry>,
    labels: Option<LabelDecl>,
}

impl LocatorFile {
    pub fn parse(path: impl Into<PathBuf>, text: String) -> Self {
        let mut entries: Vec<Entry> = Vec::new();
        for caps in ENTRY_RE.captures_iter(&text) {
            let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            if entries.iter().any(|e| e.key == key.as_str()) {
                tracing::debug!(key = key.as_str(), "duplicate locator key ignored");
                continue;
            }
            let Some(expression) = LocatorExpression::parse(value.as_str()) else {
                continue;
            };
            entries.push(Entry {
                key: key.as_str().to_string(),
                span: value.range(),
                expression,
            });
        }

        let labels = LABELS_RE.captures(&text).and_then(|caps| caps.get(1)).map(|m| LabelDecl {
            span: m.range(),
            labels: split_label_list(m.as_str()),
        });

        Self {
            path: path.into(),
            text,
            entries,
            labels,
        }
    }

    pub async fn load(path: &Path) -> HealResult<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            HealError::LocatorFile(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(Self::parse(path, text))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn definitions(&self) -> LocatorSet {
        self.entries
            .iter()
            .map(|e| (e.key.clone(), e.expression.clone()))
            .collect()
    }

    /// Declared field labels, empty when the file has no declaration.
    pub fn declared_labels(&self) -> Vec<String> {
        self.labels
            .as_ref()
            .map(|decl| decl.labels.clone())
            .unwrap_or_default()
    }

    /// Whether the file declares `"xpath=<body>"` for some key.
    pub fn contains_xpath(&self, body: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.expression == LocatorExpression::xpath(body))
    }

    /// Render the file with healed expressions and, when given, a new label list.
    /// Everything outside the rewritten quoted spans is preserved byte-for-byte.
    pub fn render_healed(&self, healed: &LocatorSet, labels: Option<&[String]>) -> String {
        let mut splices: Vec<(Range<usize>, String)> = self
            .entries
            .iter()
            .filter_map(|e| {
                let expr = healed.get(&e.key)?;
                Some((e.span.clone(), expr.to_string().replace('"', "'")))
            })
            .collect();

        if let (Some(decl), Some(labels)) = (&self.labels, labels) {
            if !labels.is_empty() {
                let joined = labels
                    .iter()
                    .map(|l| l.replace(['"', '\''], ""))
                    .collect::<Vec<_>>()
                    .join(",");
                splices.push((decl.span.clone(), joined));
            }
        }

        splices.sort_by_key(|(span, _)| span.start);
        let mut out = String::with_capacity(self.text.len());
        let mut cursor = 0;
        for (span, replacement) in splices {
            out.push_str(&self.text[cursor..span.start]);
            out.push_str(&replacement);
            cursor = span.end;
        }
        out.push_str(&self.text[cursor..]);
        out
    }
}

/// Split a comma-separated label declaration into trimmed, non-empty labels.
pub fn split_label_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Replace `path` with `contents` through a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, contents: &str) -> HealResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| HealError::LocatorFile(format!("not a file path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.heal-tmp"));
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    tracing::debug!(path = %path.display(), bytes = contents.len(), "locator file replaced");
    Ok(())
}
