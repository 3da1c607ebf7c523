use std::path::PathBuf;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::executor::{StepExecutor, StepRequest};
use crate::prompts::PromptSource;
use crate::workflow::context::{render, ContextBuilder, StepContext};
use crate::workflow::markers::{self, ReviewVerdict};
use crate::workflow::review::{LoopDecision, ReviewLoop};
use crate::workflow::state::{StateStore, WorkflowState};
use crate::workflow::types::{ChangeOutcome, IssueContext, Step};
use crate::workspace::{git, Worktree, WorktreeMode, WorktreeProvider};

/// A stage of the run. Phases covered by the checkpoint are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Step(Step),
    PrepareWorktree,
    ReviewLoop,
    Complete,
}

impl Phase {
    pub const START: Phase = Phase::Step(Step::Duplicate);

    pub fn next(self) -> Phase {
        match self {
            Phase::Step(Step::Analyze) => Phase::PrepareWorktree,
            Phase::PrepareWorktree => Phase::Step(Step::Implement),
            Phase::Step(Step::Implement) => Phase::ReviewLoop,
            Phase::ReviewLoop => Phase::Step(Step::CreatePr),
            Phase::Step(Step::CreatePr) | Phase::Complete => Phase::Complete,
            Phase::Step(step) => step.successor().map_or(Phase::Complete, Phase::Step),
        }
    }

    /// Whether a checkpoint at `last_completed` already covers this phase.
    pub fn is_covered_by(self, last_completed: u32) -> bool {
        match self {
            Phase::Step(step) => last_completed >= step.number(),
            Phase::PrepareWorktree => last_completed >= Step::CreatePr.number(),
            Phase::ReviewLoop => last_completed >= Step::FixIssues.number(),
            Phase::Complete => true,
        }
    }
}

/// Why a run stopped before completing. `Display` is the user-facing message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Halt {
    #[error("Stopped at step {step}: {reason}")]
    HardStop { step: u32, reason: &'static str },

    #[error("Stopped at step 9: Implementation produced no file changes")]
    NoFileChanges,

    #[error("Failed to create worktree: {0}")]
    WorktreeFailed(String),

    #[error("Step {step} ({description}) failed: {detail}")]
    StepFailed {
        step: u32,
        description: &'static str,
        detail: String,
    },

    #[error("Context missing key for step {step}: '{key}'")]
    ContextMissing { step: u32, key: String },

    #[error("Failed to load prompt for step {step}: {detail}")]
    PromptUnavailable { step: u32, detail: String },
}

#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub issue: IssueContext,
    /// Directory the command was started in.
    pub cwd: PathBuf,
    pub verbose: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Checkpoint directory; relative paths are resolved against the repository root.
    pub state_dir: PathBuf,
    pub max_review_iterations: u32,
    pub keep_worktree_on_stop: bool,
}

impl WorkflowSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            state_dir: config.workflow.state_dir.clone(),
            max_review_iterations: config.workflow.max_review_iterations,
            keep_worktree_on_stop: config.worktree.keep_on_stop,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct Orchestrator<'a> {
    executor: &'a dyn StepExecutor,
    prompts: &'a dyn PromptSource,
    worktrees: &'a dyn WorktreeProvider,
    settings: WorkflowSettings,
}

/// Mutable state of one invocation.
struct Run<'r> {
    request: &'r ChangeRequest,
    store: StateStore,
    state: WorkflowState,
    repo_root: PathBuf,
    worktree: Option<Worktree>,
    final_output: Option<String>,
}

impl Run<'_> {
    fn save(&self) {
        if let Err(e) = self.store.save(self.state.issue_number, &self.state) {
            tracing::warn!(error = %e, "Failed to save checkpoint");
        }
    }

    fn cwd_for(&self, step: Step) -> PathBuf {
        match &self.worktree {
            Some(worktree) if step.needs_worktree() => worktree.path.clone(),
            _ => self.request.cwd.clone(),
        }
    }

    fn modified_files(&self) -> Vec<String> {
        markers::file_list(self.state.output(Step::Implement).unwrap_or_default())
    }
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        executor: &'a dyn StepExecutor,
        prompts: &'a dyn PromptSource,
        worktrees: &'a dyn WorktreeProvider,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            executor,
            prompts,
            worktrees,
            settings,
        }
    }

    pub async fn run(&self, request: &ChangeRequest) -> ChangeOutcome {
        let issue_number = request.issue.number;
        let repo_root = git::repo_root(&request.cwd).unwrap_or_else(|| request.cwd.clone());
        let store = StateStore::new(repo_root.join(&self.settings.state_dir));

        let state = match store.load(issue_number) {
            Ok(Some(state)) => {
                tracing::info!(
                    issue = issue_number,
                    last_completed_step = state.last_completed_step,
                    "Resuming from checkpoint"
                );
                state
            }
            Ok(None) => WorkflowState::new(issue_number),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable checkpoint, starting fresh");
                WorkflowState::new(issue_number)
            }
        };

        let mut run = Run {
            request,
            store,
            state,
            repo_root,
            worktree: None,
            final_output: None,
        };

        let result = self.drive(&mut run).await;
        let modified_files = run.modified_files();

        let (success, message) = match result {
            Ok(message) => {
                if let Err(e) = run.store.clear(issue_number) {
                    tracing::warn!(error = %e, "Failed to clear checkpoint");
                }
                self.teardown(&mut run).await;
                tracing::info!(issue = issue_number, cost = run.state.total_cost, "{message}");
                (true, message)
            }
            Err(halt) => {
                run.save();
                // Past step 9 the worktree branch holds the only copy of the implementation.
                let keep = self.settings.keep_worktree_on_stop
                    || run.state.is_completed(Step::Implement);
                if !keep {
                    self.teardown(&mut run).await;
                } else if let Some(worktree) = &run.worktree {
                    tracing::info!(path = %worktree.path.display(), "Keeping worktree for resume");
                }
                tracing::warn!(issue = issue_number, "{halt}");
                (false, halt.to_string())
            }
        };

        ChangeOutcome {
            success,
            message,
            total_cost: run.state.total_cost,
            model_used: run.state.model_used.clone(),
            modified_files,
        }
    }

    async fn drive(&self, run: &mut Run<'_>) -> Result<String, Halt> {
        let mut phase = Phase::START;
        while phase != Phase::Complete {
            if phase.is_covered_by(run.state.last_completed_step) {
                tracing::debug!(?phase, "Covered by checkpoint, skipping");
            } else {
                match phase {
                    Phase::Step(step) => self.run_step(run, step).await?,
                    Phase::PrepareWorktree => self.prepare_worktree(run).await?,
                    Phase::ReviewLoop => self.review_loop(run).await?,
                    Phase::Complete => {}
                }
            }
            phase = phase.next();
        }

        let final_output = run
            .final_output
            .as_deref()
            .or_else(|| run.state.output(Step::CreatePr));
        Ok(completion_message(final_output))
    }

    /// Values every step sees: issue fields, recorded outputs, the worktree
    /// once it exists, and the step 9 file list.
    fn base_context(&self, run: &Run<'_>) -> ContextBuilder {
        let builder = ContextBuilder::for_issue(&run.request.issue)
            .with_step_outputs(&run.state)
            .with_files(&run.modified_files());
        match &run.worktree {
            Some(worktree) => builder.with_worktree(worktree),
            None => builder,
        }
    }

    /// Render the step's prompt, run it, and account for its cost.
    async fn execute(
        &self,
        run: &mut Run<'_>,
        step: Step,
        label: &str,
        context: &StepContext,
    ) -> Result<String, Halt> {
        let template = self
            .prompts
            .load(step.template_name())
            .map_err(|e| Halt::PromptUnavailable {
                step: step.number(),
                detail: e.to_string(),
            })?;
        let prompt = render(&template, context).map_err(|e| Halt::ContextMissing {
            step: step.number(),
            key: e.key,
        })?;

        let cwd = run.cwd_for(step);
        if !run.request.quiet {
            tracing::info!(label, "Running {step}");
        }

        let result = self
            .executor
            .run(StepRequest {
                label,
                prompt: &prompt,
                cwd: &cwd,
            })
            .await;

        run.state.add_cost(result.cost);
        run.state.note_model(&result.model);
        if run.request.verbose {
            tracing::info!(
                label,
                success = result.success,
                cost = result.cost,
                total_cost = run.state.total_cost,
                output = %result.output,
                "Step finished"
            );
        }

        if result.success {
            Ok(result.output)
        } else {
            Err(Halt::StepFailed {
                step: step.number(),
                description: step.description(),
                detail: result.output,
            })
        }
    }

    async fn run_step(&self, run: &mut Run<'_>, step: Step) -> Result<(), Halt> {
        let mut builder = self.base_context(run);
        if step == Step::CreatePr {
            builder = builder.with_fallback("step11_output", "");
        }
        let output = self.execute(run, step, &step.label(), &builder.build()).await?;

        match step {
            Step::Implement if markers::file_list(&output).is_empty() => {
                return Err(Halt::NoFileChanges);
            }
            Step::CreatePr => {
                run.final_output = Some(output);
                return Ok(());
            }
            _ => {}
        }

        let stop = markers::hard_stop(step, &output);
        run.state.complete_step(step, output);
        run.save();

        match stop {
            Some(reason) => Err(Halt::HardStop {
                step: step.number(),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn prepare_worktree(&self, run: &mut Run<'_>) -> Result<(), Halt> {
        let mode = if run.state.is_completed(Step::Implement) {
            WorktreeMode::Reuse
        } else {
            WorktreeMode::Fresh
        };

        match self
            .worktrees
            .create(&run.repo_root, run.state.issue_number, mode)
            .await
        {
            Ok(worktree) => {
                tracing::debug!(path = %worktree.path.display(), ?mode, "Worktree ready");
                run.worktree = Some(worktree);
                Ok(())
            }
            Err(AppError::Worktree(detail)) => Err(Halt::WorktreeFailed(detail)),
            Err(e) => Err(Halt::WorktreeFailed(e.to_string())),
        }
    }

    async fn review_loop(&self, run: &mut Run<'_>) -> Result<(), Halt> {
        let mut machine = ReviewLoop::new(self.settings.max_review_iterations);
        let mut baseline = run
            .state
            .output(Step::Implement)
            .unwrap_or_default()
            .to_string();
        let mut last_review: Option<String> = None;
        let mut last_fix: Option<String> = None;

        while let Some(iteration) = machine.begin_iteration() {
            let context = self
                .base_context(run)
                .with("step9_output", baseline.as_str())
                .with("review_iteration", iteration.to_string())
                .build();
            let label = Step::IdentifyIssues.iteration_label(iteration);

            let verdict = match self
                .execute(run, Step::IdentifyIssues, &label, &context)
                .await
            {
                Ok(output) => {
                    let verdict = markers::review_verdict(&output);
                    run.state
                        .record_output(Step::IdentifyIssues.iteration_key(iteration), output.clone());
                    last_review = Some(output);
                    verdict
                }
                Err(Halt::StepFailed { detail, .. }) => {
                    tracing::warn!(iteration, %detail, "Review pass failed");
                    ReviewVerdict::Inconclusive
                }
                Err(halt) => return Err(halt),
            };

            match machine.observe(verdict) {
                LoopDecision::Converged => {
                    tracing::info!(iteration, "Review found no issues");
                }
                LoopDecision::Exhausted => {
                    tracing::warn!(iteration, "Review limit reached with issues outstanding");
                }
                LoopDecision::Retry => {}
                LoopDecision::Fix => {
                    let findings = last_review.clone().unwrap_or_default();
                    let context = self
                        .base_context(run)
                        .with("step9_output", baseline.as_str())
                        .with("step10_output", findings)
                        .with("review_iteration", iteration.to_string())
                        .build();
                    let label = Step::FixIssues.iteration_label(iteration);

                    match self.execute(run, Step::FixIssues, &label, &context).await {
                        Ok(output) => {
                            run.state
                                .record_output(Step::FixIssues.iteration_key(iteration), output.clone());
                            baseline = output.clone();
                            last_fix = Some(output);
                        }
                        Err(Halt::StepFailed { detail, .. }) => {
                            tracing::warn!(iteration, %detail, "Fix pass failed");
                        }
                        Err(halt) => return Err(halt),
                    }
                }
            }
            run.save();
        }

        run.state.record_output(
            Step::IdentifyIssues.output_key(),
            last_review.unwrap_or_default(),
        );
        if let Some(fix) = last_fix {
            run.state.record_output(Step::FixIssues.output_key(), fix);
        }
        run.state.mark_completed(Step::FixIssues);
        run.save();
        Ok(())
    }

    async fn teardown(&self, run: &mut Run<'_>) {
        if let Some(worktree) = run.worktree.take() {
            if let Err(e) = self.worktrees.remove(&worktree).await {
                tracing::warn!(path = %worktree.path.display(), error = %e, "Failed to remove worktree");
            }
        }
    }
}

fn completion_message(final_output: Option<&str>) -> String {
    match final_output.and_then(markers::pr_url) {
        Some(url) => format!("PR Created: {url}"),
        None => "Workflow complete, but no pull request URL was found in the final step output"
            .to_string(),
    }
}
