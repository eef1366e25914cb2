use sxd_xpath::{Context, Factory, Value};

use crate::locator::{Dialect, LocatorExpression};

/// Evaluates locator expressions against a static document.
pub trait DomQueryEvaluator: Send + Sync {
    /// For each expression, whether it selects at least one node in `markup`.
    fn evaluate_all(&self, markup: &str, expressions: &[LocatorExpression]) -> Vec<bool>;
}

/// XPath 1.0 over an HTML snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct XPathEvaluator;

impl XPathEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl DomQueryEvaluator for XPathEvaluator {
    fn evaluate_all(&self, markup: &str, expressions: &[LocatorExpression]) -> Vec<bool> {
        let package = sxd_html::parse_html(markup);
        let document = package.as_document();
        let factory = Factory::new();
        let context = Context::new();

        expressions
            .iter()
            .map(|expr| {
                if expr.dialect != Dialect::XPath {
                    tracing::debug!(dialect = expr.dialect.tag(), "unsupported query dialect");
                    return false;
                }
                let xpath = match factory.build(expr.body.trim()) {
                    Ok(Some(xpath)) => xpath,
                    Ok(None) => return false,
                    Err(e) => {
                        tracing::debug!(expression = %expr.body, error = ?e, "xpath does not parse");
                        return false;
                    }
                };
                match xpath.evaluate(&context, document.root()) {
                    Ok(Value::Nodeset(nodes)) => nodes.size() > 0,
                    Ok(_) => false,
                    Err(e) => {
                        tracing::debug!(expression = %expr.body, error = ?e, "xpath evaluation failed");
                        false
                    }
                }
            })
            .collect()
    }
}
