//! End-to-end runs of the failure handler over scratch projects.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use locator_heal::artifacts::{
    DOM_FILE, ERROR_FILE, EVIDENCE_FILE, LABELS_FILE, SCREENSHOT_FILE, TRACE_FILE,
};
use locator_heal::config::{AppConfig, VariantRule};
use locator_heal::dom::{DomQueryEvaluator, XPathEvaluator};
use locator_heal::failure::FailureReport;
use locator_heal::llm::oracle::RepairOracle;
use locator_heal::llm::prompts;
use locator_heal::locator::LocatorExpression;
use locator_heal::page::SnapshotPage;
use locator_heal::resolve::StrategyKind;
use locator_heal::{FailureHandler, HealError, HealResult, Oracles};

/// Answers label checks with "no match", extraction with a fixed reply and
/// repair rounds from a queue.
struct ScriptedOracle {
    extract_reply: String,
    repairs: Mutex<VecDeque<String>>,
    repair_prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    fn new(extract_reply: &str, repairs: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            extract_reply: extract_reply.to_string(),
            repairs: Mutex::new(repairs.iter().map(|r| r.to_string()).collect()),
            repair_prompts: Mutex::new(Vec::new()),
        })
    }

    fn repair_rounds(&self) -> usize {
        self.repair_prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl RepairOracle for ScriptedOracle {
    async fn complete(&self, system: &str, user: &str) -> HealResult<String> {
        if system == prompts::LABEL_SYSTEM_PROMPT {
            return Ok("no match".into());
        }
        if system == prompts::EXTRACT_SYSTEM_PROMPT {
            return Ok(self.extract_reply.clone());
        }
        self.repair_prompts.lock().unwrap().push(user.to_string());
        self.repairs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| HealError::LlmProvider("script exhausted".into()))
    }
}

const PAGE_OBJECT: &str = "import invoiceLocators from '../locators/invoice';

export class InvoicePage {
  constructor(page) {
    this.page = page;
    this.saveBtn = page.locator(invoiceLocators.saveBtn);
  }

  async save() {
    await this.saveBtn.click();
  }
}
";

const INVOICE_LOCATORS: &str = "const invoiceLocators = {
  fieldlabels: \"Invoice Number, Save\",
  invoiceNumber: \"xpath=//input[@title='Invoice Number']\",
  saveBtn: \"xpath=//button[@id='old-save']\",
};
export default invoiceLocators;
";

const INVOICE_DOM: &str = r#"<html><body><form>
<label>Invoice Number</label><input title="Invoice Number"/>
<button id="save-btn">Save</button>
</form></body></html>"#;

const MAPPING: &str = r#"{
  "stepToLocatorMapping": {
    "Login": ["src/locators/login.ts"],
    "Navigate": ["src/locators/nav.ts"],
    "Submit": ["src/locators/fileA.ts", "src/locators/fileB.ts"]
  }
}"#;

const FILE_A: &str = "export default {\n  fieldlabels: \"Supplier, Amount\",\n  supplier: \"xpath=//input[@title='Supplier']\",\n};\n";
const FILE_B: &str = "export default {\n  fieldlabels: \"Invoice Number, Submit\",\n  submitBtn: \"xpath=//button[@id='submit']\",\n};\n";

const SUBMIT_DOM: &str = r#"<html><body><form>
<label>Invoice Number</label><input title="Invoice Number"/>
<button id="submit">Submit</button>
</form></body></html>"#;

/// Real XPath evaluation, counting how often validation runs.
#[derive(Default)]
struct CountingEvaluator {
    calls: AtomicUsize,
}

impl DomQueryEvaluator for CountingEvaluator {
    fn evaluate_all(&self, markup: &str, expressions: &[LocatorExpression]) -> Vec<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        XPathEvaluator::new().evaluate_all(markup, expressions)
    }
}

async fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.unwrap();
    }
    tokio::fs::write(&path, content).await.unwrap();
    path
}

fn config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.resolution.project_root = root.to_path_buf();
    config.artifacts.root = root.join("failures");
    config
}

fn stack_report(page_path: &Path) -> FailureReport {
    serde_json::from_value(json!({
        "title": "Invoice creation UI",
        "status": "failed",
        "errors": [{
            "message": "locator.click: Timeout 30000ms exceeded.",
            "stack": format!(
                "Error: locator.click: Timeout 30000ms exceeded.\n    at InvoicePage.save ({}:10:25)\n    at tests/invoice.spec.ts:14:3",
                page_path.display()
            )
        }]
    }))
    .unwrap()
}

fn steps_report() -> FailureReport {
    serde_json::from_value(json!({
        "title": "Invoice submit",
        "errors": [{ "message": "locator.click: Timeout 30000ms exceeded." }],
        "attachments": [
            { "name": "Step Login", "contentType": "text/plain" },
            { "name": "Step Navigate", "contentType": "text/plain" }
        ]
    }))
    .unwrap()
}

async fn read(path: impl AsRef<Path>) -> String {
    tokio::fs::read_to_string(path).await.unwrap()
}

#[tokio::test]
async fn static_trace_resolution_heals_and_rewrites_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let page_path = write(root, "src/pages/invoice.page.ts", PAGE_OBJECT).await;
    let locators = write(root, "src/locators/invoice.ts", INVOICE_LOCATORS).await;

    let oracle = ScriptedOracle::new(
        "",
        &[r#"{"invoiceNumber": "xpath=//input[@title='Invoice Number']", "saveBtn": "xpath=//button[@id='save-btn']"}"#],
    );
    let handler = FailureHandler::new(config(root), Oracles::shared(oracle.clone()));
    let page = SnapshotPage::new(INVOICE_DOM).with_url("https://erp.example/invoices/new");

    let outcome = handler.handle(&page, &stack_report(&page_path)).await.unwrap();

    let resolved = outcome.resolution.resolved.as_ref().unwrap();
    assert_eq!(resolved.strategy, StrategyKind::StaticTrace);
    assert_eq!(resolved.key.as_deref(), Some("saveBtn"));
    let healing = outcome.healing.as_ref().unwrap();
    assert_eq!(healing.attempts, 1);
    assert_eq!(healing.changed, vec!["saveBtn"]);
    assert_eq!(oracle.repair_rounds(), 1);

    assert_eq!(
        read(&locators).await,
        "const invoiceLocators = {
  fieldlabels: \"Invoice Number,Save\",
  invoiceNumber: \"xpath=//input[@title='Invoice Number']\",
  saveBtn: \"xpath=//button[@id='save-btn']\",
};
export default invoiceLocators;
"
    );

    let artifacts = &outcome.artifacts_dir;
    assert!(artifacts.file_name().unwrap().to_string_lossy().starts_with("Invoice_creation_UI_"));
    assert!(read(artifacts.join(ERROR_FILE)).await.contains("=== Basic Error 1 ==="));
    assert!(read(artifacts.join(DOM_FILE)).await.contains("URL: https://erp.example/invoices/new"));
    assert!(read(artifacts.join(LABELS_FILE)).await.contains("- Invoice Number"));
    assert!(read(artifacts.join(EVIDENCE_FILE)).await.contains("save-btn"));
    assert!(tokio::fs::read(artifacts.join(SCREENSHOT_FILE)).await.unwrap().is_empty());

    let trace = read(artifacts.join(TRACE_FILE)).await;
    assert!(trace.contains(r#""stage":"resolve.static_trace","outcome":"hit""#));
    assert!(trace.contains(r#""outcome":"converged""#));
}

#[tokio::test]
async fn step_mapping_fallback_disambiguates_with_saved_labels() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "locatorFinder.json", MAPPING).await;
    write(root, "src/locators/fileA.ts", FILE_A).await;
    let file_b = write(root, "src/locators/fileB.ts", FILE_B).await;

    // extraction names an xpath no locator file declares
    let oracle = ScriptedOracle::new(
        "//button[@id='gone']",
        &[r#"{"submitBtn": "xpath=//button[@id='submit']"}"#],
    );
    let handler = FailureHandler::new(config(root), Oracles::shared(oracle.clone()));

    let outcome = handler
        .handle(&SnapshotPage::new(SUBMIT_DOM), &steps_report())
        .await
        .unwrap();

    let resolved = outcome.resolution.resolved.as_ref().unwrap();
    assert_eq!(resolved.strategy, StrategyKind::StepMapping);
    assert_eq!(resolved.file, root.join("src/locators/fileB.ts"));
    let tried: Vec<_> = outcome.resolution.attempts.iter().map(|a| (a.strategy, a.hit)).collect();
    assert_eq!(
        tried,
        vec![
            (StrategyKind::StaticTrace, false),
            (StrategyKind::OracleSearch, false),
            (StrategyKind::StepMapping, true),
        ]
    );

    // already valid; only the label list is normalised
    assert_eq!(outcome.healing.as_ref().unwrap().changed, Vec::<String>::new());
    assert!(read(&file_b).await.contains("fieldlabels: \"Invoice Number,Submit\""));
}

#[tokio::test]
async fn prose_repair_reply_fails_after_artifacts_and_leaves_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let page_path = write(root, "src/pages/invoice.page.ts", PAGE_OBJECT).await;
    let locators = write(root, "src/locators/invoice.ts", INVOICE_LOCATORS).await;

    let oracle = ScriptedOracle::new("", &["I could not find the save button, sorry."]);
    let handler = FailureHandler::new(config(root), Oracles::shared(oracle.clone()));

    let err = handler
        .handle(&SnapshotPage::new(INVOICE_DOM), &stack_report(&page_path))
        .await
        .unwrap_err();
    assert!(matches!(err, HealError::OracleContract { .. }));
    assert_eq!(oracle.repair_rounds(), 1);
    assert_eq!(read(&locators).await, INVOICE_LOCATORS);

    let mut runs = tokio::fs::read_dir(root.join("failures")).await.unwrap();
    let run = runs.next_entry().await.unwrap().unwrap().path();
    assert!(run.join(ERROR_FILE).exists());
    assert!(run.join(EVIDENCE_FILE).exists());
    assert!(read(run.join(TRACE_FILE)).await.contains(r#""outcome":"failed""#));
}

#[tokio::test]
async fn unresolved_failure_only_produces_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let oracle = ScriptedOracle::new("", &[]);
    let handler = FailureHandler::new(config(root), Oracles::shared(oracle.clone()));

    let outcome = handler
        .handle(&SnapshotPage::new(SUBMIT_DOM), &steps_report())
        .await
        .unwrap();

    assert!(outcome.resolution.resolved.is_none());
    assert!(outcome.healing.is_none());
    assert_eq!(outcome.resolution.attempts.len(), 3);
    assert_eq!(oracle.repair_rounds(), 0);
    assert!(outcome.artifacts_dir.join(DOM_FILE).exists());
    assert!(read(outcome.artifacts_dir.join(TRACE_FILE)).await.contains(r#""outcome":"unresolved""#));
}

const VARIANT_MAPPING: &str = r#"{
  "stepToLocatorMapping": {
    "Login": ["src/locators/login.ts"],
    "Approve": ["src/locators/nav.ts"]
  },
  "invoiceApproval": {
    "Login": ["src/locators/login.ts"],
    "Approve": ["src/locators/approve.ts"]
  }
}"#;

const APPROVE_LOCATORS: &str = "export default {\n  approveBtn: \"xpath=//button[@id='approve']\",\n};\n";

const APPROVE_DOM: &str = r#"<html><body><button id="approve">Approve</button></body></html>"#;

#[tokio::test]
async fn step_prefixed_attachment_resolves_through_title_variant() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "locatorFinder.json", VARIANT_MAPPING).await;
    write(root, "src/locators/nav.ts", FILE_A).await;
    let approve = write(root, "src/locators/approve.ts", APPROVE_LOCATORS).await;

    let mut config = config(root);
    config.resolution.variants = vec![VariantRule {
        title_contains: "approval".into(),
        mapping: "invoiceApproval".into(),
    }];
    let oracle = ScriptedOracle::new("", &[r#"{"approveBtn": "xpath=//button[@id='approve']"}"#]);
    let handler = FailureHandler::new(config, Oracles::shared(oracle.clone()));

    let report: FailureReport = serde_json::from_value(json!({
        "title": "Invoice approval flow",
        "errors": [{ "message": "locator.click: Timeout 30000ms exceeded." }],
        "attachments": [{ "name": "Step Login", "contentType": "text/plain" }]
    }))
    .unwrap();
    let outcome = handler.handle(&SnapshotPage::new(APPROVE_DOM), &report).await.unwrap();

    let resolved = outcome.resolution.resolved.as_ref().unwrap();
    assert_eq!(resolved.strategy, StrategyKind::StepMapping);
    assert_eq!(resolved.file, root.join("src/locators/approve.ts"));
    assert_eq!(outcome.healing.as_ref().unwrap().file, approve);
}

#[tokio::test]
async fn transport_failure_in_last_round_exhausts_and_leaves_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let page_path = write(root, "src/pages/invoice.page.ts", PAGE_OBJECT).await;
    let locators = write(root, "src/locators/invoice.ts", INVOICE_LOCATORS).await;

    let mut config = config(root);
    config.healing.max_retries = 2;
    // round 1 repairs nothing; round 2 finds the script empty and fails in transport
    let oracle = ScriptedOracle::new(
        "",
        &[r#"{"invoiceNumber": "xpath=//input[@title='Invoice Number']", "saveBtn": "xpath=//button[@id='old-save']"}"#],
    );
    let evaluator = Arc::new(CountingEvaluator::default());
    let handler = FailureHandler::new(config, Oracles::shared(oracle.clone())).with_evaluator(evaluator.clone());
    assert_eq!(handler.config().healing.max_retries, 2);

    let err = handler
        .handle(&SnapshotPage::new(INVOICE_DOM), &stack_report(&page_path))
        .await
        .unwrap_err();

    match err {
        HealError::Exhausted { attempts, invalid_keys, unvalidated_keys } => {
            assert_eq!(attempts, 2);
            assert_eq!(invalid_keys, vec!["saveBtn"]);
            assert!(unvalidated_keys.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(oracle.repair_rounds(), 2);
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(read(&locators).await, INVOICE_LOCATORS);
}

#[tokio::test]
async fn failures_sharing_a_title_get_separate_artifact_directories() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let handler = FailureHandler::new(config(root), Oracles::shared(ScriptedOracle::new("", &[])));
    let page = SnapshotPage::new(SUBMIT_DOM);

    let first = handler.handle(&page, &steps_report()).await.unwrap();
    let second = handler.handle(&page, &steps_report()).await.unwrap();
    assert_ne!(first.artifacts_dir, second.artifacts_dir);

    let mut runs = tokio::fs::read_dir(&handler.config().artifacts.root).await.unwrap();
    let mut count = 0;
    while let Some(run) = runs.next_entry().await.unwrap() {
        assert!(run.file_name().to_string_lossy().starts_with("Invoice_submit_"));
        assert!(run.path().join(ERROR_FILE).exists());
        count += 1;
    }
    assert_eq!(count, 2);
}
