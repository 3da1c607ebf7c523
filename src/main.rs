use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use changeflow::config::{AppConfig, ExecutorBackend};
use changeflow::executor::{ClaudeApiExecutor, ClaudeCliExecutor, StepExecutor};
use changeflow::platform::github::GitHubPlatform;
use changeflow::platform::types::IssueRef;
use changeflow::platform::Platform;
use changeflow::prompts::PromptLibrary;
use changeflow::workflow::{ChangeRequest, Orchestrator, WorkflowSettings};
use changeflow::workspace::WorktreeManager;

#[derive(Parser)]
#[command(
    name = "changeflow",
    about = "Take a GitHub issue through a resumable, multi-step agentic change workflow"
)]
struct Cli {
    /// Issue URL, e.g. https://github.com/owner/repo/issues/42
    issue_url: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Working directory (defaults to the current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Log every step's output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = AppConfig::load(cli.config.as_deref())?;
    let cwd = match cli.cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let issue_ref = IssueRef::parse(&cli.issue_url)?;
    let platform = GitHubPlatform::new(&config.github)?;
    let issue = platform
        .get_issue(&issue_ref.full_name(), issue_ref.number)
        .await?;
    tracing::info!(
        repo = %issue_ref.full_name(),
        issue = issue.number,
        title = %issue.title,
        "Starting change workflow"
    );

    let executor: Box<dyn StepExecutor> = match config.executor.backend {
        ExecutorBackend::Cli => Box::new(ClaudeCliExecutor::new(&config.executor)),
        ExecutorBackend::Api => Box::new(ClaudeApiExecutor::new(&config.executor)?),
    };
    let prompts = PromptLibrary::new(config.workflow.prompts_dir.clone());
    let worktrees = WorktreeManager::new(&config.worktree);

    let orchestrator = Orchestrator::new(
        executor.as_ref(),
        &prompts,
        &worktrees,
        WorkflowSettings::from_config(&config),
    );
    let outcome = orchestrator
        .run(&ChangeRequest {
            issue: issue.into_context(&issue_ref),
            cwd,
            verbose: cli.verbose,
            quiet: cli.quiet,
        })
        .await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.message);
        println!("Total cost: ${:.4}", outcome.total_cost);
        if !outcome.model_used.is_empty() {
            println!("Model: {}", outcome.model_used);
        }
        if !outcome.modified_files.is_empty() {
            println!("Files: {}", outcome.modified_files.join(", "));
        }
    }

    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}
