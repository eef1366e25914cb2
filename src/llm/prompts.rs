//! Prompt text sent to the repair oracle.

/// Reference of locator-writing rules embedded into every repair prompt.
pub const XPATH_BEST_PRACTICES: &str = include_str!("../../prompts/xpath_best_practices.md");

pub const EXTRACT_SYSTEM_PROMPT: &str = "Extract the raw XPath from this browser test error. \
Do not return anything else, only the XPath inside waiting for locator(\"...\").";

pub const LABEL_SYSTEM_PROMPT: &str = "You are a strict UI field label verifier. Never hallucinate.";

/// System instructions for one repair round.
pub fn repair_system_prompt(best_practices: &str) -> String {
    format!(
        "You are an expert web automation engineer.\n\
Your job: review and repair a map of locators using the current UI HTML and generic patterns.\n\
NEVER give explanations. Only output a JSON object (not an array) that directly maps locator keys to healed XPath strings.\n\
NEVER change keys or add new ones. Maintain exact formatting. Do NOT add or remove fields.\n\
Refer to these best practices:\n{best_practices}"
    )
}

/// User prompt for one repair round.
///
/// `retrying` marks rounds after the first, where only the keys that failed
/// DOM validation are sent.
pub fn repair_user_prompt(
    locators_json: &str,
    evidence_json: &str,
    field_labels: &[String],
    failed_validation: &[String],
) -> String {
    let mut prompt = String::new();
    if !failed_validation.is_empty() {
        prompt.push_str(&format!(
            "The following locators failed DOM validation and need to be fixed again: {}\n",
            failed_validation.join(", ")
        ));
    }
    if !field_labels.is_empty() {
        prompt.push_str(&format!(
            "Field labels for this page/module are: {}\n",
            serde_json::to_string(field_labels).unwrap_or_default()
        ));
    }
    prompt.push_str(&format!(
        "Here is the locator map (key-value of locator variable names to XPath strings in \"xpath=...\" format):\n\
{locators_json}\n\
Here is a sample of current UI HTML elements matched by field label:\n\
{evidence_json}\n\
If any XPath value is incorrect or outdated, repair it using best practices.\n\
Your response MUST be a JSON object with the SAME KEYS and new XPath strings as values (in \"xpath=...\" format).\n\
Use the field labels while healing the XPaths."
    ));
    prompt
}

pub fn label_user_prompt(label: &str, detected: &[String]) -> String {
    let listing = detected
        .iter()
        .map(|l| format!("- {l}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "We are verifying if a UI field label from our test scripts is still valid.\n\n\
Given:\n\
- Original label: \"{label}\"\n\
- A list of field labels extracted from the current UI.\n\n\
Step 1: check whether the original label is still present with minor typos, spacing issues or casing differences.\n\
Step 2: otherwise check known semantic equivalences, for example [User Name, usr, User ID, user], \
[Password, pwd, pass, passwd], [Sign In, Login].\n\
Step 3: only then suggest a likely rename that appears in the extracted labels.\n\n\
Do not guess. If no match exists, reply with exactly: no match\n\
Otherwise reply with only the corrected label.\n\n\
Extracted Labels:\n{listing}\n"
    )
}
