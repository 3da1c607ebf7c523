pub mod claude;
pub mod cli;

use std::path::Path;

use async_trait::async_trait;

pub use claude::ClaudeApiExecutor;
pub use cli::ClaudeCliExecutor;

/// One labeled unit of LLM work.
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    /// `stepN`, or `stepN_iterK` inside the review loop.
    pub label: &'a str,
    pub prompt: &'a str,
    /// Directory the agent works in (the worktree from step 9 on).
    pub cwd: &'a Path,
}

/// Outcome of one executor invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub success: bool,
    pub output: String,
    /// USD, never negative.
    pub cost: f64,
    pub model: String,
}

impl StepResult {
    pub fn succeeded(output: impl Into<String>, cost: f64, model: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            cost,
            model: model.into(),
        }
    }

    pub fn failed(error: impl Into<String>, cost: f64, model: impl Into<String>) -> Self {
        Self {
            success: false,
            output: error.into(),
            cost,
            model: model.into(),
        }
    }
}

/// Runs steps against an LLM agent.
///
/// Implementations report failures through `StepResult::success` rather than
/// an error so the orchestrator can still account for the cost incurred.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn run(&self, request: StepRequest<'_>) -> StepResult;
}
