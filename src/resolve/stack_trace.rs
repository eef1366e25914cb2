//! Static resolution of the failing locator from a stack trace.
//!
//! The chain is: stack frame in a page-object file → member used on the
//! failing line → `this.<member> = [this.]page.locator(<Alias>.<key>)` in the
//! constructor → `import <Alias> from '<path>'`. Every link has its own miss
//! reason; a missing link ends resolution.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorReference {
    pub key: String,
    /// Locator file relative to the project root, `/`-separated.
    pub file: String,
    /// Lexically normalized absolute path of the locator file.
    pub path: PathBuf,
}

/// Why the static chain could not be followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceMiss {
    NoSourceFrame,
    SourceUnreadable(PathBuf),
    LineOutOfRange(usize),
    NoMemberOnLine,
    NoConstructor,
    NoAssignment(String),
    NoImport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceFrame {
    path: String,
    line: usize,
}

pub struct StackTraceResolver {
    project_root: PathBuf,
    page_object_suffix: String,
    default_extension: String,
    known_extensions: Vec<String>,
}

impl StackTraceResolver {
    pub fn new(
        project_root: impl Into<PathBuf>,
        page_object_suffix: impl Into<String>,
        default_extension: impl Into<String>,
        known_extensions: Vec<String>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            page_object_suffix: page_object_suffix.into(),
            default_extension: default_extension.into(),
            known_extensions,
        }
    }

    pub async fn resolve(&self, error_text: &str) -> Option<LocatorReference> {
        match self.resolve_detailed(error_text).await {
            Ok(found) => Some(found),
            Err(miss) => {
                tracing::debug!(?miss, "static stack resolution missed");
                None
            }
        }
    }

    pub async fn resolve_detailed(&self, error_text: &str) -> Result<LocatorReference, TraceMiss> {
        let root = absolute(&self.project_root);
        let frame = find_source_frame(error_text, &self.page_object_suffix).ok_or(TraceMiss::NoSourceFrame)?;

        let frame_path = PathBuf::from(frame.path.trim());
        let page_path = normalize(&if frame_path.is_absolute() { frame_path } else { root.join(frame_path) });
        let source = tokio::fs::read_to_string(&page_path)
            .await
            .map_err(|_| TraceMiss::SourceUnreadable(page_path.clone()))?;
        let lines: Vec<&str> = source.lines().collect();

        let failing = frame
            .line
            .checked_sub(1)
            .and_then(|idx| lines.get(idx))
            .ok_or(TraceMiss::LineOutOfRange(frame.line))?;
        let member = member_on_line(failing).ok_or(TraceMiss::NoMemberOnLine)?;

        let ctor = lines
            .iter()
            .position(|l| l.contains("constructor("))
            .ok_or(TraceMiss::NoConstructor)?;
        let window = lines.get(ctor..frame.line.min(lines.len())).unwrap_or(&[]);
        let (alias, key) = window
            .iter()
            .find_map(|line| parse_assignment(line, member))
            .ok_or_else(|| TraceMiss::NoAssignment(member.to_string()))?;

        let import_path = lines
            .iter()
            .find_map(|line| parse_import(line, alias))
            .ok_or_else(|| TraceMiss::NoImport(alias.to_string()))?;

        let mut rel = import_path.to_string();
        let has_known_ext = self
            .known_extensions
            .iter()
            .any(|ext| rel.ends_with(&format!(".{ext}")));
        if !has_known_ext {
            rel.push('.');
            rel.push_str(&self.default_extension);
        }

        let base = page_path.parent().unwrap_or(Path::new(""));
        let path = normalize(&base.join(&rel));
        let file = path
            .strip_prefix(&root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");

        tracing::info!(key = key, file = %file, "locator resolved from stack trace");
        Ok(LocatorReference {
            key: key.to_string(),
            file,
            path,
        })
    }
}

/// First stack frame (`at fn (path:line:col)` or `at path:line:col`) whose path
/// ends with the page-object suffix.
fn find_source_frame(error_text: &str, suffix: &str) -> Option<SourceFrame> {
    error_text.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("at ")?;
        let location = match (rest.rfind('('), rest.ends_with(')')) {
            (Some(open), true) => &rest[open + 1..rest.len() - 1],
            _ => rest,
        };
        let mut parts = location.rsplitn(3, ':');
        let _column: usize = parts.next()?.trim().parse().ok()?;
        let line_no: usize = parts.next()?.trim().parse().ok()?;
        let path = parts.next()?.trim();
        if !path.ends_with(suffix) {
            return None;
        }
        Some(SourceFrame {
            path: path.to_string(),
            line: line_no,
        })
    })
}

/// Minimal cursor over one source line.
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, lit: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(lit) {
            self.pos += lit.len();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let mut chars = rest.char_indices();
        let (_, first) = chars.next()?;
        if !(first.is_ascii_alphabetic() || first == '_' || first == '$') {
            return None;
        }
        let end = chars
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += end;
        Some(&rest[..end])
    }

    fn string_lit(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let quote = rest.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;
        let close = rest[1..].find(quote)?;
        self.pos += close + 2;
        Some(&rest[1..close + 1])
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }
}

/// The first `this.<member>` on a line.
fn member_on_line(line: &str) -> Option<&str> {
    line.match_indices("this.").find_map(|(idx, _)| {
        let mut cur = Cursor::new(line, idx + "this.".len());
        cur.ident()
    })
}

/// Parse `this.<member> = [this.]page.locator(<Alias>.<key>)` or
/// `... locator(<Alias>['<key>'])`, returning `(alias, key)`.
fn parse_assignment<'a>(line: &'a str, member: &str) -> Option<(&'a str, &'a str)> {
    line.match_indices("this.").find_map(|(idx, _)| {
        let mut cur = Cursor::new(line, idx + "this.".len());
        if cur.ident()? != member || !cur.eat("=") || cur.peek() == Some('=') {
            return None;
        }
        if cur.eat("this") && !cur.eat(".") {
            return None;
        }
        if !(cur.eat("page") && cur.eat(".") && cur.eat("locator") && cur.eat("(")) {
            return None;
        }
        let alias = cur.ident()?;
        let key = if cur.eat(".") {
            cur.ident()?
        } else if cur.eat("[") {
            let key = cur.string_lit()?;
            if !cur.eat("]") {
                return None;
            }
            key
        } else {
            return None;
        };
        cur.eat(")").then_some((alias, key))
    })
}

/// Parse `import <Alias> from '<path>'` or `import * as <Alias> from "<path>"`.
fn parse_import<'a>(line: &'a str, alias: &str) -> Option<&'a str> {
    let mut cur = Cursor::new(line, 0);
    if cur.ident()? != "import" {
        return None;
    }
    let name = if cur.eat("*") {
        if cur.ident()? != "as" {
            return None;
        }
        cur.ident()?
    } else {
        cur.ident()?
    };
    if name != alias || cur.ident()? != "from" {
        return None;
    }
    cur.string_lit()
}

fn absolute(path: &Path) -> PathBuf {
    normalize(&std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()))
}

/// Resolve `.` and `..` components without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
