//! Static DOM access: locator validation and label-matched UI evidence.

pub mod evidence;
pub mod xpath;

pub use evidence::{EvidenceCollector, UiEvidence};
pub use xpath::{DomQueryEvaluator, XPathEvaluator};
