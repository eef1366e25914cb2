//! Locator definitions: symbolic keys mapped to dialect-tagged query expressions.

pub mod file;

use std::fmt;

pub use file::LocatorFile;

/// Query language a locator expression is written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialect {
    XPath,
    Other(String),
}

impl Dialect {
    pub fn tag(&self) -> &str {
        match self {
            Dialect::XPath => "xpath",
            Dialect::Other(tag) => tag,
        }
    }

    fn from_tag(tag: &str) -> Self {
        if tag.eq_ignore_ascii_case("xpath") {
            Dialect::XPath
        } else {
            Dialect::Other(tag.to_ascii_lowercase())
        }
    }
}

/// A locator expression such as `xpath=//button[@id='save']`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorExpression {
    pub dialect: Dialect,
    pub body: String,
}

impl LocatorExpression {
    pub fn xpath(body: impl Into<String>) -> Self {
        Self {
            dialect: Dialect::XPath,
            body: body.into(),
        }
    }

    /// Parse a `<tag>=<body>` string. Returns `None` when no dialect tag is present.
    pub fn parse(raw: &str) -> Option<Self> {
        let (tag, body) = raw.trim().split_once('=')?;
        let tag_ok = !tag.is_empty() && tag.len() <= 12 && tag.chars().all(|c| c.is_ascii_alphabetic());
        if !tag_ok {
            return None;
        }
        Some(Self {
            dialect: Dialect::from_tag(tag),
            body: body.to_string(),
        })
    }
}

impl fmt::Display for LocatorExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.dialect.tag(), self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorDefinition {
    pub key: String,
    pub expression: LocatorExpression,
}

/// Ordered key→expression map; order follows the locator file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatorSet {
    entries: Vec<LocatorDefinition>,
}

impl LocatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&LocatorExpression> {
        self.entries
            .iter()
            .find(|d| d.key == key)
            .map(|d| &d.expression)
    }

    /// Replace the expression for `key`, appending the key if it is new.
    pub fn set(&mut self, key: &str, expression: LocatorExpression) {
        match self.entries.iter_mut().find(|d| d.key == key) {
            Some(existing) => existing.expression = expression,
            None => self.entries.push(LocatorDefinition {
                key: key.to_string(),
                expression,
            }),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|d| d.key.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocatorDefinition> {
        self.entries.iter()
    }

    /// The entries whose keys appear in `keys`, in file order.
    pub fn subset(&self, keys: &[String]) -> LocatorSet {
        LocatorSet {
            entries: self
                .entries
                .iter()
                .filter(|d| keys.contains(&d.key))
                .cloned()
                .collect(),
        }
    }

    /// JSON object of `key → "tag=body"` as sent to the repair oracle.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .entries
            .iter()
            .map(|d| (d.key.clone(), serde_json::Value::String(d.expression.to_string())))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl FromIterator<(String, LocatorExpression)> for LocatorSet {
    fn from_iter<I: IntoIterator<Item = (String, LocatorExpression)>>(iter: I) -> Self {
        let mut set = LocatorSet::new();
        for (key, expression) in iter {
            set.set(&key, expression);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_expressions() {
        let expr = LocatorExpression::parse("xpath=//a[@title='Home']").unwrap();
        assert_eq!(expr.dialect, Dialect::XPath);
        assert_eq!(expr.body, "//a[@title='Home']");
        assert_eq!(expr.to_string(), "xpath=//a[@title='Home']");

        let css = LocatorExpression::parse("css=#save").unwrap();
        assert_eq!(css.dialect, Dialect::Other("css".into()));
    }

    #[test]
    fn untagged_expression_is_rejected() {
        assert!(LocatorExpression::parse("//a[@title='Home']").is_none());
        assert!(LocatorExpression::parse("//a[@x=1]").is_none());
        assert!(LocatorExpression::parse("").is_none());
    }

    #[test]
    fn set_preserves_order_and_subset_filters() {
        let mut set: LocatorSet = vec![
            ("a".to_string(), LocatorExpression::xpath("//a")),
            ("b".to_string(), LocatorExpression::xpath("//b")),
            ("c".to_string(), LocatorExpression::xpath("//c")),
        ]
        .into_iter()
        .collect();
        set.set("b", LocatorExpression::xpath("//bb"));
        assert_eq!(set.keys(), vec!["a", "b", "c"]);
        assert_eq!(set.get("b").unwrap().body, "//bb");

        let sub = set.subset(&["c".to_string(), "a".to_string()]);
        assert_eq!(sub.keys(), vec!["a", "c"]);
        assert_eq!(
            sub.to_json().to_string(),
            r#"{"a":"xpath=//a","c":"xpath=//c"}"#
        );
    }
}
