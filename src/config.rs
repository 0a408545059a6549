//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::orchestrator::completion::ForcedStatusPolicy;
use crate::{AppError, Result};

/// Environment variables inherited by spawned agent processes by default.
///
/// Every other variable from the host environment is stripped before the
/// child is launched, so provider keys held by the desktop shell never reach
/// the agent unless the caller's environment builder adds them explicitly.
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "TMPDIR",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Agent CLI invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent CLI binary (e.g., `opencode`), resolved through the CLI probe.
    pub cli: String,
    /// Arguments passed to the CLI before any per-task arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Flag used to resume an existing agent session (e.g., `--session`).
    #[serde(default)]
    pub resume_arg: Option<String>,
    /// Flag used to select a model (e.g., `--model`).
    #[serde(default)]
    pub model_arg: Option<String>,
    /// Grace period between SIGTERM and SIGKILL on cancellation.
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,
    /// Host environment variables passed through to the agent.
    #[serde(default = "default_env_allowlist")]
    pub env_allowlist: Vec<String>,
}

fn default_termination_grace_ms() -> u64 {
    5000
}

fn default_env_allowlist() -> Vec<String> {
    DEFAULT_ENV_ALLOWLIST.iter().map(|&s| s.to_owned()).collect()
}

impl AgentConfig {
    /// Build a config for `cli` with default arguments and timings.
    #[must_use]
    pub fn for_cli(cli: impl Into<String>) -> Self {
        Self {
            cli: cli.into(),
            args: Vec::new(),
            resume_arg: None,
            model_arg: None,
            termination_grace_ms: default_termination_grace_ms(),
            env_allowlist: default_env_allowlist(),
        }
    }

    /// Grace period between the soft and the forceful kill signal.
    #[must_use]
    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}

/// Completion enforcement settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CompletionConfig {
    /// Continuation prompts injected before a task is forced to a terminal
    /// status. Needs product confirmation; keep it tunable.
    #[serde(default = "default_max_continuation_attempts")]
    pub max_continuation_attempts: u32,
    /// Prompt written to the agent when it stops without calling the
    /// completion tool.
    #[serde(default = "default_continuation_prompt")]
    pub continuation_prompt: String,
    /// Terminal statuses assigned when a task is forced to finish.
    #[serde(default)]
    pub forced_status: ForcedStatusPolicy,
}

fn default_max_continuation_attempts() -> u32 {
    3
}

fn default_continuation_prompt() -> String {
    "You stopped without calling the complete_task tool. If work remains, continue \
     working on the original request. If you are finished or cannot proceed, call \
     complete_task now with status success, blocked, or partial."
        .into()
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_continuation_attempts: default_max_continuation_attempts(),
            continuation_prompt: default_continuation_prompt(),
            forced_status: ForcedStatusPolicy::default(),
        }
    }
}

/// Output stream handling settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Window during which consecutive messages are coalesced into one batch.
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,
    /// Largest unterminated line buffered before it is discarded.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Character budget for tool output when not in verbose mode.
    #[serde(default = "default_max_tool_output_chars")]
    pub max_tool_output_chars: usize,
    /// Keep tool output untruncated.
    #[serde(default)]
    pub verbose_tool_output: bool,
}

fn default_batch_window_ms() -> u64 {
    50
}

fn default_max_line_bytes() -> usize {
    crate::stream::codec::MAX_LINE_BYTES
}

fn default_max_tool_output_chars() -> usize {
    crate::processor::sanitize::DEFAULT_TOOL_OUTPUT_CHARS
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: default_batch_window_ms(),
            max_line_bytes: default_max_line_bytes(),
            max_tool_output_chars: default_max_tool_output_chars(),
            verbose_tool_output: false,
        }
    }
}

impl StreamConfig {
    /// Batching window as a [`Duration`].
    #[must_use]
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

fn default_max_concurrent_tasks() -> u32 {
    3
}

fn default_max_queue_length() -> u32 {
    10
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Default working directory for agent processes.
    pub workspace_root: PathBuf,
    /// Maximum agent processes running at once.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
    /// Maximum tasks waiting for a free slot.
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: u32,
    /// Agent CLI invocation.
    pub agent: AgentConfig,
    /// Completion enforcement tunables.
    #[serde(default)]
    pub completion: CompletionConfig,
    /// Stream parsing and batching.
    #[serde(default)]
    pub stream: StreamConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Absolute path to the default working directory.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    fn validate(&mut self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(AppError::Config(
                "max_concurrent_tasks must be greater than zero".into(),
            ));
        }

        if self.agent.cli.trim().is_empty() {
            return Err(AppError::Config("agent.cli must not be empty".into()));
        }

        if !self.completion.forced_status.is_valid() {
            return Err(AppError::Config(
                "completion.forced_status must map to success, blocked, partial or error".into(),
            ));
        }

        if self.stream.max_line_bytes == 0 {
            return Err(AppError::Config(
                "stream.max_line_bytes must be greater than zero".into(),
            ));
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}
