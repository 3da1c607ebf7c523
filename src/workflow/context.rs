use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::workflow::state::WorkflowState;
use crate::workflow::types::IssueContext;
use crate::workspace::Worktree;

/// `{{`, `}}`, or a `{identifier}` placeholder.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// The values available to one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepContext {
    values: BTreeMap<String, String>,
}

impl StepContext {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

#[derive(Debug, Default)]
pub struct ContextBuilder {
    values: BTreeMap<String, String>,
}

impl ContextBuilder {
    pub fn for_issue(issue: &IssueContext) -> Self {
        Self::default()
            .with("issue_url", &issue.url)
            .with("issue_content", &issue.content)
            .with("repo_owner", &issue.repo_owner)
            .with("repo_name", &issue.repo_name)
            .with("issue_number", issue.number.to_string())
            .with("issue_author", &issue.author)
            .with("issue_title", &issue.title)
    }

    /// Expose every recorded output as `step<key>_output`.
    pub fn with_step_outputs(mut self, state: &WorkflowState) -> Self {
        for (key, output) in &state.step_outputs {
            self.values.insert(format!("step{key}_output"), output.clone());
        }
        self
    }

    pub fn with_worktree(self, worktree: &Worktree) -> Self {
        self.with("worktree_path", worktree.path.display().to_string())
            .with("branch_name", &worktree.branch)
    }

    pub fn with_files(self, files: &[String]) -> Self {
        self.with("files_to_stage", files.join(", "))
    }

    /// Set a value, replacing any earlier one.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Set a value only if nothing has been supplied for `key` yet.
    pub fn with_fallback(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values
            .entry(key.to_string())
            .or_insert_with(|| value.into());
        self
    }

    pub fn build(self) -> StepContext {
        StepContext {
            values: self.values,
        }
    }
}

/// A placeholder in the template had no value in the context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing context key '{key}'")]
pub struct MissingKey {
    pub key: String,
}

/// Substitute `{name}` placeholders in one pass.
///
/// `{{` and `}}` produce literal braces. Brace text that is not a plain
/// identifier (for example JSON pasted into a template) is left as is.
/// Context values the template does not mention are ignored.
pub fn render(template: &str, context: &StepContext) -> Result<String, MissingKey> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).expect("group 0 always matches");
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(substitution(&caps, context)?);
        last = whole.end();
    }

    rendered.push_str(&template[last..]);
    Ok(rendered)
}

fn substitution<'c>(caps: &Captures<'_>, context: &'c StepContext) -> Result<&'c str, MissingKey> {
    match caps.get(1) {
        Some(name) => context.get(name.as_str()).ok_or_else(|| MissingKey {
            key: name.as_str().to_string(),
        }),
        None if &caps[0] == "{{" => Ok("{"),
        None => Ok("}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::Step;

    fn issue(content: &str) -> IssueContext {
        IssueContext {
            url: "https://github.com/owner/repo/issues/319".to_string(),
            content: content.to_string(),
            repo_owner: "owner".to_string(),
            repo_name: "repo".to_string(),
            number: 319,
            author: "user".to_string(),
            title: "Bug with JSON".to_string(),
        }
    }

    const JSON_BODY: &str = r#"The API returns:
```json
{
  "type": "error",
  "details": {"retry_after": 30}
}
```"#;

    #[test]
    fn test_renders_issue_fields() {
        let context = ContextBuilder::for_issue(&issue("Fix bug")).build();
        let out = render("#{issue_number} {issue_title} by {issue_author}", &context).unwrap();
        assert_eq!(out, "#319 Bug with JSON by user");
    }

    #[test]
    fn test_json_in_issue_body_stays_literal() {
        let context = ContextBuilder::for_issue(&issue(JSON_BODY)).build();
        let out = render("Issue: {issue_content}\nURL: {issue_url}", &context).unwrap();
        assert!(out.contains(r#""type": "error""#));
        assert!(out.contains(r#"{"retry_after": 30}"#));
    }

    #[test]
    fn test_json_in_step_output_stays_literal() {
        let mut state = crate::workflow::state::WorkflowState::new(320);
        state.complete_step(Step::Clarify, "{\n  \"feature\": \"dark_mode\"\n}".to_string());
        let context = ContextBuilder::for_issue(&issue("x"))
            .with_step_outputs(&state)
            .build();

        let out = render("Step4: {step4_output}\nIssue: {issue_title}", &context).unwrap();
        assert!(out.contains("\"feature\": \"dark_mode\""));
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let context = ContextBuilder::default()
            .with("a", "{b}")
            .with("b", "SHOULD NOT APPEAR")
            .build();
        assert_eq!(render("<{a}>", &context).unwrap(), "<{b}>");
    }

    #[test]
    fn test_undeclared_template_name_fails() {
        let context = ContextBuilder::for_issue(&issue("x")).build();
        let err = render("Review: {step9_output}", &context).unwrap_err();
        assert_eq!(err.key, "step9_output");
    }

    #[test]
    fn test_template_may_use_a_subset() {
        let context = ContextBuilder::for_issue(&issue("x"))
            .with("unused", "value")
            .build();
        assert_eq!(render("static text", &context).unwrap(), "static text");
    }

    #[test]
    fn test_doubled_braces_are_escapes() {
        let context = ContextBuilder::default().with("name", "v").build();
        assert_eq!(render("{{name}} = {name}", &context).unwrap(), "{name} = v");
        assert_eq!(render("}}{{", &context).unwrap(), "}{");
    }

    #[test]
    fn test_non_identifier_braces_in_template_are_literal() {
        let context = ContextBuilder::default().build();
        let template = "Example:\n{\n  \"type\": \"test\"\n}";
        assert_eq!(render(template, &context).unwrap(), template);
    }

    #[test]
    fn test_fallback_does_not_override() {
        let context = ContextBuilder::default()
            .with("step11_output", "fixed")
            .with_fallback("step11_output", "")
            .with_fallback("other", "default")
            .build();
        assert_eq!(context.get("step11_output"), Some("fixed"));
        assert_eq!(context.get("other"), Some("default"));
    }

    #[test]
    fn test_files_are_comma_joined() {
        let context = ContextBuilder::default()
            .with_files(&["a.py".to_string(), "b.py".to_string()])
            .build();
        assert_eq!(context.get("files_to_stage"), Some("a.py, b.py"));
    }
}
