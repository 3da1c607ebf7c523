use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::workflow::types::Step;

pub trait PromptSource: Send + Sync {
    /// Load the template registered under `name`.
    fn load(&self, name: &str) -> Result<String>;
}

/// Built-in step templates, optionally overridden by `<dir>/<name>.prompt` files.
pub struct PromptLibrary {
    dir: Option<PathBuf>,
}

impl PromptLibrary {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn builtin_only() -> Self {
        Self { dir: None }
    }
}

impl PromptSource for PromptLibrary {
    fn load(&self, name: &str) -> Result<String> {
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{name}.prompt"));
            match std::fs::read_to_string(&path) {
                Ok(template) => {
                    tracing::debug!(path = %path.display(), "Loaded prompt override");
                    return Ok(template);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(AppError::Template(format!(
                        "Failed to read {}: {e}",
                        path.display()
                    )))
                }
            }
        }

        Step::ALL
            .iter()
            .find(|step| step.template_name() == name)
            .map(|step| builtin(*step).to_string())
            .ok_or_else(|| AppError::Template(format!("Unknown prompt template: {name}")))
    }
}

const ISSUE_HEADER: &str = r#"You are working on repository `{repo_owner}/{repo_name}`.

## Issue #{issue_number}: {issue_title}
Reported by @{issue_author} at {issue_url}

{issue_content}
"#;

fn builtin(step: Step) -> String {
    let body = match step {
        Step::Duplicate => {
            r#"## Task: duplicate check
Search the repository's open and closed issues for one that asks for the same change.
If this issue duplicates another, reply with the line `Duplicate of #<number>` and a short justification.
Otherwise summarise the request in a few sentences."#
        }
        Step::Docs => {
            r#"## Task: documentation check
Earlier findings:
{step1_output}

Read the project's documentation and code to decide whether the requested behaviour already exists.
If it does, reply with `Already Implemented` and point to where.
Otherwise list the documents and modules the change touches."#
        }
        Step::Research => {
            r#"## Task: research
Documentation check:
{step2_output}

Research the libraries, APIs and prior art relevant to this change and summarise what matters for implementing it."#
        }
        Step::Clarify => {
            r#"## Task: clarification
Research notes:
{step3_output}

Restate the requirements precisely. If something essential is ambiguous and cannot be decided from the code, reply with `Clarification Needed` followed by the questions for the author."#
        }
        Step::DocsChange => {
            r#"## Task: documentation changes
Requirements:
{step4_output}

Describe the documentation and prompt changes this issue requires, file by file."#
        }
        Step::DevUnits => {
            r#"## Task: identify dev units
Documentation changes:
{step5_output}

List the development units (modules, prompts, tests) that must change, with one line on what changes in each."#
        }
        Step::Architecture => {
            r#"## Task: architecture review
Dev units:
{step6_output}

Check the plan against the existing architecture.
If the change needs an architectural decision from a maintainer, reply with `Architectural Decision Needed` and describe the options.
Otherwise confirm the plan and note constraints."#
        }
        Step::Analyze => {
            r#"## Task: change analysis
Requirements:
{step4_output}

Dev units:
{step6_output}

Architecture review:
{step7_output}

Produce an ordered implementation plan with the exact files to touch."#
        }
        Step::Implement => {
            r#"## Task: implement
You are in a dedicated worktree at `{worktree_path}` on branch `{branch_name}`.

Documentation changes:
{step5_output}

Plan:
{step8_output}

Implement the plan and the documentation changes. Finish your reply with the files you touched, comma separated:
FILES_CREATED: <new files>
FILES_MODIFIED: <changed files>"#
        }
        Step::IdentifyIssues => {
            r#"## Task: identify issues (review pass {review_iteration})
Worktree: `{worktree_path}` on branch `{branch_name}`
Files in scope: {files_to_stage}

Implementation summary:
{step9_output}

Review the changes for bugs, missing tests and deviations from the plan.
If everything is correct reply with `No Issues Found`. Otherwise list each issue."#
        }
        Step::FixIssues => {
            r#"## Task: fix issues
Worktree: `{worktree_path}` on branch `{branch_name}`
Files in scope: {files_to_stage}

Review findings:
{step10_output}

Fix every issue listed above and summarise what changed."#
        }
        Step::CreatePr => {
            r#"## Task: create pull request
Worktree: `{worktree_path}` on branch `{branch_name}`
Files to stage: {files_to_stage}

Implementation summary:
{step9_output}

Final review:
{step10_output}

Last fixes:
{step11_output}

Stage and commit the files, push `{branch_name}`, and open a pull request that closes #{issue_number}.
Reply with `PR Created: <pull request URL>`."#
        }
    };
    format!("{ISSUE_HEADER}\n{body}\n")
}
