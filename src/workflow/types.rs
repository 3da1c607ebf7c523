use std::fmt;

/// The twelve stages of the change workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    Duplicate,
    Docs,
    Research,
    Clarify,
    DocsChange,
    DevUnits,
    Architecture,
    Analyze,
    Implement,
    IdentifyIssues,
    FixIssues,
    CreatePr,
}

impl Step {
    pub const ALL: [Step; 12] = [
        Step::Duplicate,
        Step::Docs,
        Step::Research,
        Step::Clarify,
        Step::DocsChange,
        Step::DevUnits,
        Step::Architecture,
        Step::Analyze,
        Step::Implement,
        Step::IdentifyIssues,
        Step::FixIssues,
        Step::CreatePr,
    ];

    /// 1-based step number.
    pub fn number(self) -> u32 {
        self as u32 + 1
    }

    pub fn from_number(number: u32) -> Option<Step> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        Step::ALL.get(index).copied()
    }

    pub fn successor(self) -> Option<Step> {
        Step::from_number(self.number() + 1)
    }

    /// Executor label for a single-run step, e.g. `step9`.
    pub fn label(self) -> String {
        format!("step{}", self.number())
    }

    /// Executor label for a review-loop pass, e.g. `step10_iter2`.
    pub fn iteration_label(self, iteration: u32) -> String {
        format!("step{}_iter{iteration}", self.number())
    }

    /// Checkpoint key for the step's output.
    pub fn output_key(self) -> String {
        self.number().to_string()
    }

    /// Checkpoint key for one review-loop pass of this step.
    pub fn iteration_key(self, iteration: u32) -> String {
        format!("{}_iter{iteration}", self.number())
    }

    pub fn template_name(self) -> &'static str {
        match self {
            Step::Duplicate => "agentic_change_step1_duplicate_LLM",
            Step::Docs => "agentic_change_step2_docs_LLM",
            Step::Research => "agentic_change_step3_research_LLM",
            Step::Clarify => "agentic_change_step4_clarify_LLM",
            Step::DocsChange => "agentic_change_step5_docs_change_LLM",
            Step::DevUnits => "agentic_change_step6_devunits_LLM",
            Step::Architecture => "agentic_change_step7_architecture_LLM",
            Step::Analyze => "agentic_change_step8_analyze_LLM",
            Step::Implement => "agentic_change_step9_implement_LLM",
            Step::IdentifyIssues => "agentic_change_step10_identify_issues_LLM",
            Step::FixIssues => "agentic_change_step11_fix_issues_LLM",
            Step::CreatePr => "agentic_change_step12_create_pr_LLM",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Step::Duplicate => "duplicate check",
            Step::Docs => "documentation check",
            Step::Research => "research",
            Step::Clarify => "clarification",
            Step::DocsChange => "documentation changes",
            Step::DevUnits => "dev unit identification",
            Step::Architecture => "architecture review",
            Step::Analyze => "change analysis",
            Step::Implement => "implementation",
            Step::IdentifyIssues => "identify issues",
            Step::FixIssues => "fix issues",
            Step::CreatePr => "create pull request",
        }
    }

    /// Steps from here on run inside the isolated worktree.
    pub fn needs_worktree(self) -> bool {
        self >= Step::Implement
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.number(), self.description())
    }
}

/// Issue metadata the workflow is driven from.
#[derive(Debug, Clone)]
pub struct IssueContext {
    pub url: String,
    /// Issue body, with discussion comments appended.
    pub content: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub number: u64,
    pub author: String,
    pub title: String,
}

/// Final result of one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ChangeOutcome {
    pub success: bool,
    pub message: String,
    pub total_cost: f64,
    pub model_used: String,
    pub modified_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_numbers_round_trip() {
        for (index, step) in Step::ALL.iter().enumerate() {
            assert_eq!(step.number() as usize, index + 1);
            assert_eq!(Step::from_number(step.number()), Some(*step));
        }
        assert_eq!(Step::from_number(0), None);
        assert_eq!(Step::from_number(13), None);
    }

    #[test]
    fn test_labels() {
        assert_eq!(Step::Implement.label(), "step9");
        assert_eq!(Step::IdentifyIssues.iteration_label(2), "step10_iter2");
        assert_eq!(Step::FixIssues.iteration_key(3), "11_iter3");
        assert_eq!(Step::CreatePr.output_key(), "12");
    }

    #[test]
    fn test_successor_ends_at_create_pr() {
        assert_eq!(Step::Analyze.successor(), Some(Step::Implement));
        assert_eq!(Step::CreatePr.successor(), None);
    }

    #[test]
    fn test_worktree_steps() {
        assert!(!Step::Analyze.needs_worktree());
        assert!(Step::Implement.needs_worktree());
        assert!(Step::CreatePr.needs_worktree());
    }
}
