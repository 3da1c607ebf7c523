use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::ExecutorConfig;
use crate::error::{AppError, Result};
use crate::executor::{StepExecutor, StepRequest, StepResult};

/// Runs each step through the `claude` CLI in print mode.
///
/// The CLI acts on the files in the step's working directory, so the
/// implementation and review steps edit the worktree directly.
pub struct ClaudeCliExecutor {
    program: String,
    model: Option<String>,
    extra_args: Vec<String>,
    timeout: Duration,
}

/// The subset of `--output-format json` we rely on.
#[derive(Debug, Deserialize)]
struct CliResult {
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: String,
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default, rename = "modelUsage")]
    model_usage: BTreeMap<String, serde_json::Value>,
}

impl ClaudeCliExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            program: config.cli_program.clone(),
            model: config.model.clone(),
            extra_args: config.cli_args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn fallback_model(&self) -> &str {
        self.model.as_deref().unwrap_or("claude-cli")
    }

    async fn invoke(&self, request: StepRequest<'_>) -> Result<StepResult> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("json")
            .current_dir(request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd.args(&self.extra_args);

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Executor(format!("Failed to spawn {}: {e}", self.program)))?;

        // Prompt goes over stdin; closing it signals end of input.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Executor("stdin was not piped".to_string()))?;
        let prompt = request.prompt;
        let exchange = async move {
            stdin.write_all(prompt.as_bytes()).await?;
            drop(stdin);
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                AppError::Executor(format!(
                    "{} timed out after {}s",
                    request.label,
                    self.timeout.as_secs()
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_cli_output(&stdout, self.fallback_model()) {
            Ok(result) => Ok(result),
            Err(_) if !output.status.success() => Err(AppError::Executor(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StepExecutor for ClaudeCliExecutor {
    async fn run(&self, request: StepRequest<'_>) -> StepResult {
        tracing::debug!(label = request.label, cwd = %request.cwd.display(), "Spawning claude CLI");
        match self.invoke(request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(label = request.label, error = %e, "CLI step failed");
                StepResult::failed(e.to_string(), 0.0, self.fallback_model())
            }
        }
    }
}

/// Map the CLI's JSON result onto a `StepResult`.
fn parse_cli_output(stdout: &str, fallback_model: &str) -> Result<StepResult> {
    // Some CLI versions print log lines before the JSON object.
    let json = stdout
        .find('{')
        .map(|start| &stdout[start..])
        .ok_or_else(|| AppError::Executor("CLI produced no JSON output".to_string()))?;
    let parsed: CliResult = serde_json::from_str(json.trim_end())?;

    let model = parsed
        .model_usage
        .keys()
        .next()
        .cloned()
        .unwrap_or_else(|| fallback_model.to_string());
    let cost = parsed.total_cost_usd.max(0.0);

    Ok(if parsed.is_error {
        StepResult::failed(parsed.result, cost, model)
    } else {
        StepResult::succeeded(parsed.result, cost, model)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let stdout = r#"{"type":"result","subtype":"success","is_error":false,
            "result":"FILES_MODIFIED: a.py","total_cost_usd":0.42,
            "modelUsage":{"claude-sonnet-4":{"inputTokens":10}}}"#;
        let result = parse_cli_output(stdout, "fallback").unwrap();
        assert!(result.success);
        assert_eq!(result.output, "FILES_MODIFIED: a.py");
        assert_eq!(result.cost, 0.42);
        assert_eq!(result.model, "claude-sonnet-4");
    }

    #[test]
    fn test_parse_error_result_keeps_cost() {
        let stdout = r#"{"is_error":true,"result":"API overloaded","total_cost_usd":0.05}"#;
        let result = parse_cli_output(stdout, "fallback").unwrap();
        assert!(!result.success);
        assert_eq!(result.output, "API overloaded");
        assert_eq!(result.cost, 0.05);
        assert_eq!(result.model, "fallback");
    }

    #[test]
    fn test_parse_skips_leading_noise() {
        let stdout = "warning: something\n{\"result\":\"ok\"}\n";
        let result = parse_cli_output(stdout, "m").unwrap();
        assert!(result.success);
        assert_eq!(result.output, "ok");
        assert_eq!(result.cost, 0.0);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_cli_output("command not found", "m").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_covers_a_cli_that_never_reads_its_prompt() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let program = tmp.path().join("stalled-claude");
        std::fs::write(&program, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = ExecutorConfig {
            cli_program: program.display().to_string(),
            timeout_secs: 1,
            ..ExecutorConfig::default()
        };
        let executor = ClaudeCliExecutor::new(&config);
        // Far larger than a pipe buffer, so the write blocks until the timeout.
        let prompt = "x".repeat(4 * 1024 * 1024);

        let result = tokio::time::timeout(
            Duration::from_secs(20),
            executor.run(StepRequest {
                label: "step9",
                prompt: &prompt,
                cwd: tmp.path(),
            }),
        )
        .await
        .expect("step should time out on its own");

        assert!(!result.success);
        assert_eq!(result.output, "Step executor error: step9 timed out after 1s");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_failed_step() {
        let config = ExecutorConfig {
            cli_program: "definitely-not-a-real-claude-binary".to_string(),
            ..ExecutorConfig::default()
        };
        let executor = ClaudeCliExecutor::new(&config);
        let tmp = tempfile::tempdir().unwrap();

        let result = executor
            .run(StepRequest {
                label: "step1",
                prompt: "hello",
                cwd: tmp.path(),
            })
            .await;

        assert!(!result.success);
        assert!(result.output.contains("Failed to spawn"));
        assert_eq!(result.cost, 0.0);
    }
}
