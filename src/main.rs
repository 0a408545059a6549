#![forbid(unsafe_code)]

//! `agent-conductor` runs prompts through an agent CLI with bounded
//! concurrency.
//!
//! Loads configuration, starts one task per `--prompt` (queueing beyond the
//! concurrency limit), logs each task's events, and exits when every task has
//! finished or a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conductor::adapter::cli::CliAdapterFactory;
use agent_conductor::config::GlobalConfig;
use agent_conductor::models::progress::TaskProgress;
use agent_conductor::models::task::{
    PermissionRequest, TaskConfig, TaskMessage, TaskResult, TaskStatus,
};
use agent_conductor::{AppError, Result, TaskCallbacks, TaskManager, TaskManagerOptions};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conductor", about = "Run prompts through an agent CLI", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the workspace root agents run in.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Prompt to run as a task; repeat for several tasks.
    #[arg(long = "prompt", required = true)]
    prompts: Vec<String>,

    /// Model identifier passed to the agent CLI.
    #[arg(long)]
    model: Option<String>,
}

/// Logs every task event and reports terminal results to `main`.
struct LogCallbacks {
    done_tx: mpsc::UnboundedSender<(String, TaskResult)>,
}

impl TaskCallbacks for LogCallbacks {
    fn on_message(&self, task_id: &str, messages: &[TaskMessage]) {
        for message in messages {
            info!(
                task_id,
                kind = ?message.kind,
                tool = message.tool_name.as_deref(),
                content = %message.content,
                "message"
            );
        }
    }

    fn on_progress(&self, task_id: &str, progress: &TaskProgress) {
        info!(task_id, stage = ?progress.stage, "progress");
    }

    fn on_permission_request(&self, task_id: &str, request: &PermissionRequest) {
        warn!(
            task_id,
            tool = request.tool.as_deref(),
            description = request.description.as_deref(),
            "agent is waiting for permission"
        );
    }

    fn on_complete(&self, task_id: &str, result: &TaskResult) {
        let _ = self.done_tx.send((task_id.to_owned(), result.clone()));
    }

    fn on_error(&self, task_id: &str, error: &str) {
        error!(task_id, error, "task failed");
    }

    fn on_status_change(&self, task_id: &str, status: TaskStatus) {
        info!(task_id, ?status, "status changed");
    }

    fn on_debug(&self, task_id: &str, line: &str) {
        debug!(task_id, line, "agent output");
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-conductor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;

    if let Some(ws) = args.workspace {
        let canonical = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        config.workspace_root = canonical;
    }
    info!(
        workspace = %config.workspace_root().display(),
        cli = %config.agent.cli,
        max_concurrent_tasks = config.max_concurrent_tasks,
        "configuration loaded"
    );

    // ── Build the task manager ──────────────────────────
    let factory = Arc::new(CliAdapterFactory::new(&config));
    let manager = TaskManager::new(factory, TaskManagerOptions::from_config(&config));

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let callbacks: Arc<dyn TaskCallbacks> = Arc::new(LogCallbacks { done_tx });

    // ── Start tasks ─────────────────────────────────────
    let mut pending = 0usize;
    for prompt in args.prompts {
        let task_id = uuid::Uuid::new_v4().to_string();
        let task_config = TaskConfig {
            model: args.model.clone(),
            ..TaskConfig::new(prompt)
        };
        match manager
            .start_task(&task_id, task_config, Arc::clone(&callbacks))
            .await
        {
            Ok(task) => {
                info!(task_id = %task_id, status = ?task.status, "task accepted");
                pending += 1;
            }
            Err(err) => error!(task_id = %task_id, %err, "task rejected"),
        }
    }

    // ── Wait for completion or shutdown ─────────────────
    let mut failures = 0usize;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    while pending > 0 {
        tokio::select! {
            () = &mut shutdown => {
                info!(pending, "shutdown signal received");
                break;
            }
            done = done_rx.recv() => {
                let Some((task_id, result)) = done else { break };
                pending -= 1;
                if !result.status.is_agent_verdict() {
                    failures += 1;
                }
                info!(
                    task_id = %task_id,
                    status = ?result.status,
                    forced = result.forced,
                    session_id = result.session_id.as_deref(),
                    summary = result.summary.as_deref(),
                    remaining_work = result.remaining_work.as_deref(),
                    "task finished"
                );
            }
        }
    }

    manager.dispose().await;
    info!(failures, "agent-conductor shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
