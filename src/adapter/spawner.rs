//! Agent process spawner.
//!
//! Spawns one headless agent process per task with:
//! - `kill_on_drop(true)` so a leaked handle never leaves an orphan behind.
//! - `env_clear()` followed by the variables from the caller's
//!   [`EnvironmentBuilder`](super::environment::EnvironmentBuilder), so host
//!   secrets only reach the agent when explicitly passed through.
//! - Piped stdin, stdout and stderr.
//!
//! [`CliProbe`] locates the executable beforehand, so a missing CLI is
//! reported as [`AppError::CliNotFound`] without starting anything.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::config::AgentConfig;
use crate::models::task::TaskConfig;
use crate::{AppError, Result};

// ── CLI probe ────────────────────────────────────────────────────────────────

/// Resolves the agent executable before any process is spawned.
pub trait CliProbe: Send + Sync {
    /// Absolute or directly usable path to `cli`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::CliNotFound`] if `cli` cannot be located.
    fn resolve(&self, cli: &str) -> Result<PathBuf>;
}

/// Looks commands up on `PATH`; paths containing a separator must exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathProbe;

impl CliProbe for PathProbe {
    fn resolve(&self, cli: &str) -> Result<PathBuf> {
        let candidate = Path::new(cli);
        if candidate.components().count() > 1 || candidate.is_absolute() {
            return if candidate.is_file() {
                Ok(candidate.to_path_buf())
            } else {
                Err(AppError::CliNotFound(format!("{cli}: no such file")))
            };
        }

        which::which(cli).map_err(|err| AppError::CliNotFound(format!("{cli}: {err}")))
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

/// Command-line arguments for one task.
///
/// Order: configured base arguments, `[resume_arg, session_id]` when
/// resuming, `[model_arg, model]` when a model is set, then the prompt.
/// Resume and model values are skipped when the agent config has no flag for
/// them.
#[must_use]
pub fn build_args(agent: &AgentConfig, config: &TaskConfig) -> Vec<String> {
    let mut args = agent.args.clone();

    if let (Some(flag), Some(session_id)) = (&agent.resume_arg, &config.session_id) {
        args.push(flag.clone());
        args.push(session_id.clone());
    }

    if let (Some(flag), Some(model)) = (&agent.model_arg, &config.model) {
        args.push(flag.clone());
        args.push(model.clone());
    }

    args.push(config.prompt.clone());
    args
}

// ── Spawn ────────────────────────────────────────────────────────────────────

/// Everything needed to launch one agent process.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Resolved executable.
    pub program: PathBuf,
    /// Full argument list.
    pub args: Vec<String>,
    /// Working directory of the child.
    pub working_dir: PathBuf,
    /// Complete child environment.
    pub env: Vec<(String, String)>,
}

/// A freshly spawned agent process with its stdio handles detached.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child handle; `kill_on_drop` is set.
    pub child: Child,
    /// OS process id, if the child is still running.
    pub pid: Option<u32>,
    /// Agent stdin.
    pub stdin: ChildStdin,
    /// Agent stdout (NDJSON events).
    pub stdout: ChildStdout,
    /// Agent stderr (diagnostics).
    pub stderr: ChildStderr,
}

/// Spawn the agent process described by `request`.
///
/// # Errors
///
/// - `AppError::Process("failed to spawn agent: …")` on OS spawn failure.
/// - `AppError::Process("failed to capture agent …")` if a stdio pipe is
///   missing.
pub fn spawn_agent(task_id: &str, request: &SpawnRequest) -> Result<AgentProcess> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args);

    cmd.env_clear();
    cmd.envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    cmd.current_dir(&request.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Process(format!("failed to spawn agent: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stderr".into()))?;

    let pid = child.id();
    info!(
        task_id,
        pid,
        program = %request.program.display(),
        cwd = %request.working_dir.display(),
        "agent process spawned"
    );

    Ok(AgentProcess {
        child,
        pid,
        stdin,
        stdout,
        stderr,
    })
}
