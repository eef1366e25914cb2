use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::dom::{DomQueryEvaluator, EvidenceCollector, UiEvidence};
use crate::errors::{HealError, HealResult};
use crate::heal::state::{HealState, HealingAttempt};
use crate::llm::oracle::{strip_code_fences, RepairOracle};
use crate::llm::prompts;
use crate::locator::file::write_atomic;
use crate::locator::{LocatorExpression, LocatorFile, LocatorSet};

/// Outcome of a converged run.
#[derive(Debug, Clone, PartialEq)]
pub struct HealReport {
    pub file: PathBuf,
    /// Oracle rounds used, transport failures included.
    pub attempts: u32,
    /// Keys whose expression differs from the original file.
    pub changed: Vec<String>,
    pub labels_rewritten: bool,
}

/// Repairs every locator of one file against a static DOM snapshot.
pub struct LocatorHealer {
    oracle: Arc<dyn RepairOracle>,
    evaluator: Arc<dyn DomQueryEvaluator>,
    collector: EvidenceCollector,
    max_rounds: u32,
    best_practices: String,
    observer: Option<mpsc::UnboundedSender<HealState>>,
}

impl LocatorHealer {
    pub fn new(
        oracle: Arc<dyn RepairOracle>,
        evaluator: Arc<dyn DomQueryEvaluator>,
        collector: EvidenceCollector,
        max_retries: u32,
    ) -> Self {
        Self {
            oracle,
            evaluator,
            collector,
            max_rounds: max_retries.max(1),
            best_practices: prompts::XPATH_BEST_PRACTICES.to_string(),
            observer: None,
        }
    }

    pub fn with_best_practices(mut self, text: impl Into<String>) -> Self {
        self.best_practices = text.into();
        self
    }

    /// Receive every state transition.
    pub fn with_observer(mut self, tx: mpsc::UnboundedSender<HealState>) -> Self {
        self.observer = Some(tx);
        self
    }

    fn enter(&self, state: &HealState) {
        tracing::debug!(state = state.name(), "healing state");
        if let Some(tx) = &self.observer {
            let _ = tx.send(state.clone());
        }
    }

    /// Run the loop on `path`. The file is rewritten only when every key validates;
    /// `labels`, when non-empty, also replace the declared field labels.
    pub async fn heal(&self, path: &Path, markup: &str, labels: &[String]) -> HealResult<HealReport> {
        let file = LocatorFile::load(path).await?;
        let original = file.definitions();
        if original.is_empty() {
            return Err(HealError::LocatorFile(format!(
                "no xpath locators declared in {}",
                file.path().display()
            )));
        }
        tracing::info!(path = %path.display(), keys = original.len(), "healing locator file");

        let markup: Arc<str> = Arc::from(markup);
        let system = prompts::repair_system_prompt(&self.best_practices);
        let mut attempt = HealingAttempt::first(original.clone());
        let mut state = HealState::Drafting {
            attempt: 0,
            keys: attempt.pending.clone(),
        };

        loop {
            self.enter(&state);
            match state {
                HealState::Drafting { attempt: round, keys } => {
                    let evidence = self.collect_evidence(markup.clone(), labels).await?;
                    let (failed, _) = attempt.pending_status();
                    let prompt = prompts::repair_user_prompt(
                        &serde_json::to_string_pretty(&attempt.request().to_json())?,
                        &serde_json::to_string_pretty(&evidence)?,
                        labels,
                        &failed,
                    );
                    tracing::info!(round, keys = keys.len(), evidence = evidence.match_count(), "requesting repair");

                    state = match self.oracle.complete(&system, &prompt).await {
                        Ok(reply) => {
                            let repairs = parse_repair_reply(&reply, &attempt.request())?;
                            attempt = attempt.apply(&repairs);
                            HealState::Validating { attempt: round }
                        }
                        Err(e) if e.is_transient_oracle_failure() => {
                            tracing::warn!(round, keys = keys.len(), error = %e, "repair call failed; round consumed");
                            let (invalid, unvalidated) = attempt.pending_status();
                            self.after_round(round, invalid, unvalidated)
                        }
                        Err(e) => return Err(e),
                    };
                }

                HealState::Validating { attempt: round } => {
                    let verdicts = self.validate(markup.clone(), attempt.expressions()).await?;
                    let (valid, invalid) = attempt.partition(&verdicts);
                    tracing::info!(round, valid = valid.len(), invalid = invalid.len(), "validation done");
                    state = if invalid.is_empty() {
                        HealState::Converged { attempts: round + 1 }
                    } else {
                        self.after_round(round, invalid, Vec::new())
                    };
                }

                HealState::Retrying { invalid, unvalidated, .. } => {
                    attempt = attempt.retry(invalid, unvalidated);
                    state = HealState::Drafting {
                        attempt: attempt.index,
                        keys: attempt.pending.clone(),
                    };
                }

                HealState::Converged { attempts } => {
                    let labels = (!labels.is_empty()).then_some(labels);
                    let rendered = file.render_healed(&attempt.working, labels);
                    write_atomic(file.path(), &rendered).await?;
                    let changed: Vec<String> = attempt
                        .working
                        .iter()
                        .filter(|d| original.get(&d.key) != Some(&d.expression))
                        .map(|d| d.key.clone())
                        .collect();
                    tracing::info!(path = %path.display(), attempts, changed = changed.len(), "locators healed");
                    return Ok(HealReport {
                        file: path.to_path_buf(),
                        attempts,
                        changed,
                        labels_rewritten: labels.is_some(),
                    });
                }

                HealState::Exhausted { attempts, invalid, unvalidated } => {
                    tracing::error!(
                        path = %path.display(),
                        attempts,
                        invalid = ?invalid,
                        unvalidated = ?unvalidated,
                        "healing exhausted"
                    );
                    return Err(HealError::Exhausted {
                        attempts,
                        invalid_keys: invalid,
                        unvalidated_keys: unvalidated,
                    });
                }
            }
        }
    }

    fn after_round(&self, round: u32, invalid: Vec<String>, unvalidated: Vec<String>) -> HealState {
        if round + 1 < self.max_rounds {
            HealState::Retrying {
                attempt: round,
                invalid,
                unvalidated,
            }
        } else {
            HealState::Exhausted {
                attempts: round + 1,
                invalid,
                unvalidated,
            }
        }
    }

    async fn collect_evidence(&self, markup: Arc<str>, labels: &[String]) -> HealResult<UiEvidence> {
        let collector = self.collector.clone();
        let labels = labels.to_vec();
        tokio::task::spawn_blocking(move || collector.collect(&markup, &labels))
            .await
            .map_err(|e| HealError::Page(format!("evidence task failed: {e}")))
    }

    async fn validate(&self, markup: Arc<str>, expressions: Vec<LocatorExpression>) -> HealResult<Vec<bool>> {
        let evaluator = self.evaluator.clone();
        tokio::task::spawn_blocking(move || evaluator.evaluate_all(&markup, &expressions))
            .await
            .map_err(|e| HealError::Page(format!("validation task failed: {e}")))
    }
}

/// Check a repair reply against the request: a JSON object with exactly the
/// requested keys, each a string in the same dialect.
pub fn parse_repair_reply(reply: &str, request: &LocatorSet) -> HealResult<LocatorSet> {
    let body = strip_code_fences(reply);
    let value: Value =
        serde_json::from_str(body).map_err(|e| HealError::contract(format!("reply is not JSON: {e}"), reply))?;
    let Value::Object(map) = value else {
        return Err(HealError::contract("reply is not a JSON object", reply));
    };

    let expected: HashSet<&str> = request.iter().map(|d| d.key.as_str()).collect();
    let mut missing: Vec<&str> = request
        .iter()
        .map(|d| d.key.as_str())
        .filter(|k| !map.contains_key(*k))
        .collect();
    let extra: Vec<&str> = map.keys().map(String::as_str).filter(|k| !expected.contains(k)).collect();
    if !missing.is_empty() || !extra.is_empty() {
        missing.sort_unstable();
        return Err(HealError::contract(
            format!("reply keys differ (missing: {missing:?}, unexpected: {extra:?})"),
            reply,
        ));
    }

    let mut repairs = LocatorSet::new();
    for def in request.iter() {
        let raw = map
            .get(&def.key)
            .and_then(Value::as_str)
            .ok_or_else(|| HealError::contract(format!("value of '{}' is not a string", def.key), reply))?;
        let expr = LocatorExpression::parse(raw)
            .ok_or_else(|| HealError::contract(format!("value of '{}' has no dialect tag", def.key), reply))?;
        if expr.dialect != def.expression.dialect {
            return Err(HealError::contract(
                format!(
                    "value of '{}' switched dialect from {} to {}",
                    def.key,
                    def.expression.dialect.tag(),
                    expr.dialect.tag()
                ),
                reply,
            ));
        }
        repairs.set(&def.key, expr);
    }
    Ok(repairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::XPathEvaluator;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const DOM: &str = r#"<html><body>
<input id="user" placeholder="Username"/>
<button id="new">Save</button>
</body></html>"#;

    const LOCATORS: &str = "export default {\n  fieldlabels: \"Username, Save\",\n  user: \"xpath=//input[@id='user']\",\n  btn: \"xpath=//button[@id='old']\",\n};\n";

    struct Script {
        replies: Mutex<Vec<HealResult<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Script {
        fn new(replies: Vec<HealResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RepairOracle for Script {
        async fn complete(&self, _system: &str, user: &str) -> HealResult<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn healer(oracle: Arc<Script>, max: u32) -> LocatorHealer {
        LocatorHealer::new(oracle, Arc::new(XPathEvaluator::new()), EvidenceCollector::default(), max)
    }

    async fn locator_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("login.ts");
        tokio::fs::write(&path, LOCATORS).await.unwrap();
        (dir, path)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn second_round_only_asks_for_invalid_keys() {
        let (_dir, path) = locator_file().await;
        let oracle = Script::new(vec![
            Ok(r#"{"user": "xpath=//input[@id='user']", "btn": "xpath=//button[@id='still-old']"}"#.into()),
            Ok("```json\n{\"btn\": \"xpath=//button[@id=\\\"new\\\"]\"}\n```".into()),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = healer(oracle.clone(), 4)
            .with_observer(tx)
            .heal(&path, DOM, &strings(&["User Name", "Save"]))
            .await
            .unwrap();

        assert_eq!(report.attempts, 2);
        assert_eq!(report.changed, vec!["btn"]);
        assert!(report.labels_rewritten);

        let prompts = oracle.prompts.lock().unwrap();
        assert!(prompts[0].contains("\"user\""));
        assert!(!prompts[1].contains("\"user\""));
        assert!(prompts[1].contains("failed DOM validation"));

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            written,
            "export default {\n  fieldlabels: \"User Name,Save\",\n  user: \"xpath=//input[@id='user']\",\n  btn: \"xpath=//button[@id='new']\",\n};\n"
        );

        let mut names = Vec::new();
        while let Ok(state) = rx.try_recv() {
            names.push(state.name());
        }
        assert_eq!(
            names,
            vec!["drafting", "validating", "retrying", "drafting", "validating", "converged"]
        );
    }

    #[tokio::test]
    async fn prose_reply_is_fatal_and_file_untouched() {
        let (_dir, path) = locator_file().await;
        let oracle = Script::new(vec![Ok("Sure! The button id changed to new.".into())]);
        let err = healer(oracle.clone(), 4).heal(&path, DOM, &[]).await.unwrap_err();
        assert!(matches!(err, HealError::OracleContract { .. }));
        assert_eq!(oracle.prompts.lock().unwrap().len(), 1);
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), LOCATORS);
    }

    #[tokio::test]
    async fn exhaustion_reports_keys_and_leaves_file_byte_identical() {
        let (_dir, path) = locator_file().await;
        let oracle = Script::new(vec![
            Ok(r#"{"user": "xpath=//input[@id='user']", "btn": "xpath=//button[@id='x1']"}"#.into()),
            Err(HealError::OracleTimeout { seconds: 1 }),
            Ok(r#"{"btn": "xpath=//button[@id='x3']"}"#.into()),
        ]);
        let err = healer(oracle.clone(), 3).heal(&path, DOM, &[]).await.unwrap_err();
        match err {
            HealError::Exhausted { attempts, invalid_keys, unvalidated_keys } => {
                assert_eq!(attempts, 3);
                assert_eq!(invalid_keys, vec!["btn"]);
                assert!(unvalidated_keys.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        // the timed-out round retried the same key
        let prompts = oracle.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(!prompts[2].contains("\"user\""));
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), LOCATORS);
    }

    #[tokio::test]
    async fn transport_failures_never_claim_validation_failed() {
        let (_dir, path) = locator_file().await;
        let oracle = Script::new(vec![
            Err(HealError::LlmProvider("502 Bad Gateway".into())),
            Err(HealError::OracleTimeout { seconds: 1 }),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = healer(oracle.clone(), 2)
            .with_observer(tx)
            .heal(&path, DOM, &[])
            .await
            .unwrap_err();

        match err {
            HealError::Exhausted { attempts, invalid_keys, unvalidated_keys } => {
                assert_eq!(attempts, 2);
                assert!(invalid_keys.is_empty());
                assert_eq!(unvalidated_keys, vec!["user", "btn"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let prompts = oracle.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("\"user\""));
        assert!(!prompts[1].contains("failed DOM validation"));

        let mut names = Vec::new();
        while let Ok(state) = rx.try_recv() {
            names.push(state.name());
        }
        assert_eq!(names, vec!["drafting", "retrying", "drafting", "exhausted"]);
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), LOCATORS);
    }

    #[tokio::test]
    async fn transport_failure_in_last_round_exhausts_with_file_untouched() {
        let (_dir, path) = locator_file().await;
        let oracle = Script::new(vec![
            Ok(r#"{"user": "xpath=//input[@id='user']", "btn": "xpath=//button[@id='x1']"}"#.into()),
            Err(HealError::OracleTimeout { seconds: 1 }),
        ]);
        let err = healer(oracle.clone(), 2).heal(&path, DOM, &[]).await.unwrap_err();
        match err {
            HealError::Exhausted { attempts, invalid_keys, unvalidated_keys } => {
                assert_eq!(attempts, 2);
                assert_eq!(invalid_keys, vec!["btn"]);
                assert!(unvalidated_keys.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(oracle.prompts.lock().unwrap().len(), 2);
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), LOCATORS);
    }

    #[tokio::test]
    async fn non_transient_oracle_errors_abort() {
        let (_dir, path) = locator_file().await;
        let oracle = Script::new(vec![Err(HealError::Config("no provider".into()))]);
        let err = healer(oracle, 4).heal(&path, DOM, &[]).await.unwrap_err();
        assert!(matches!(err, HealError::Config(_)));
    }

    #[test]
    fn reply_contract() {
        let request: LocatorSet = [
            ("a".to_string(), LocatorExpression::xpath("//a")),
            ("b".to_string(), LocatorExpression::xpath("//b")),
        ]
        .into_iter()
        .collect();

        let ok = parse_repair_reply(r#"{"b": "xpath=//b2", "a": "xpath=//a2"}"#, &request).unwrap();
        assert_eq!(ok.keys(), vec!["a", "b"]);

        for bad in [
            "not json",
            r#"["xpath=//a"]"#,
            r#"{"a": "xpath=//a"}"#,
            r#"{"a": "xpath=//a", "b": "xpath=//b", "c": "xpath=//c"}"#,
            r#"{"a": "xpath=//a", "b": 3}"#,
            r#"{"a": "xpath=//a", "b": "//b"}"#,
            r#"{"a": "xpath=//a", "b": "css=.b"}"#,
        ] {
            let err = parse_repair_reply(bad, &request).unwrap_err();
            assert!(matches!(err, HealError::OracleContract { .. }), "{bad}");
        }
    }

    #[tokio::test]
    async fn file_without_locators_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.ts");
        tokio::fs::write(&path, "export default {};\n").await.unwrap();
        let err = healer(Script::new(vec![]), 4).heal(&path, DOM, &[]).await.unwrap_err();
        assert!(matches!(err, HealError::LocatorFile(_)));
    }
}
