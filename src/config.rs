use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub worktree: WorktreeConfig,
}

#[derive(Deserialize, Clone, Default)]
pub struct GitHubConfig {
    /// Personal access token. Public issues can be read without one.
    #[serde(default)]
    pub token: Option<String>,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Which step executor backend runs the LLM steps.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorBackend {
    /// Spawn the `claude` CLI in the step's working directory.
    #[default]
    Cli,
    /// Call the Anthropic Messages API directly.
    Api,
}

#[derive(Deserialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub backend: ExecutorBackend,
    /// Model passed through to the backend. `None` lets the CLI pick.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_cli_program")]
    pub cli_program: String,
    #[serde(default)]
    pub cli_args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// USD per million input tokens (API backend only).
    #[serde(default = "default_input_cost")]
    pub input_cost_per_mtok: f64,
    /// USD per million output tokens (API backend only).
    #[serde(default = "default_output_cost")]
    pub output_cost_per_mtok: f64,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("cli_program", &self.cli_program)
            .field("cli_args", &self.cli_args)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("max_tokens", &self.max_tokens)
            .field("input_cost_per_mtok", &self.input_cost_per_mtok)
            .field("output_cost_per_mtok", &self.output_cost_per_mtok)
            .finish()
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backend: ExecutorBackend::default(),
            model: None,
            cli_program: default_cli_program(),
            cli_args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
            max_tokens: default_max_tokens(),
            input_cost_per_mtok: default_input_cost(),
            output_cost_per_mtok: default_output_cost(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Checkpoint directory, relative to the repository root.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Directory of `<template>.prompt` overrides. Built-in templates otherwise.
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,
    #[serde(default = "default_max_review_iterations")]
    pub max_review_iterations: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            prompts_dir: None,
            max_review_iterations: default_max_review_iterations(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorktreeConfig {
    /// Worktree parent directory, relative to the repository root.
    #[serde(default = "default_worktree_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Leave the worktree in place when the workflow stops or fails.
    #[serde(default)]
    pub keep_on_stop: bool,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            base_dir: default_worktree_dir(),
            branch_prefix: default_branch_prefix(),
            keep_on_stop: false,
        }
    }
}

fn default_cli_program() -> String {
    "claude".to_string()
}

fn default_timeout_secs() -> u64 {
    30 * 60
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_input_cost() -> f64 {
    3.0
}

fn default_output_cost() -> f64 {
    15.0
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".pdd/change-state")
}

fn default_max_review_iterations() -> u32 {
    5
}

fn default_worktree_dir() -> PathBuf {
    PathBuf::from(".pdd/worktrees")
}

fn default_branch_prefix() -> String {
    "change/issue-".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("changeflow").required(false));
        }

        // Environment overrides, e.g. CHANGEFLOW__WORKFLOW__MAX_REVIEW_ITERATIONS
        builder = builder.add_source(
            config::Environment::with_prefix("CHANGEFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workflow.max_review_iterations == 0 {
            return Err(AppError::Config(
                "workflow.max_review_iterations must be at least 1".to_string(),
            ));
        }
        if self.executor.backend == ExecutorBackend::Api && self.executor.api_key.is_none() {
            return Err(AppError::Config(
                "executor.api_key is required for the api backend".to_string(),
            ));
        }
        if self.executor.timeout_secs == 0 {
            return Err(AppError::Config(
                "executor.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
