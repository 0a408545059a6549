//! Task model and lifecycle helpers.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for a delegated task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the overflow queue for a free slot.
    Queued,
    /// An agent process is working on the task.
    Running,
    /// The agent finished with a success, blocked, or partial verdict.
    Completed,
    /// The agent or its process failed.
    Failed,
    /// The caller cancelled the task.
    Cancelled,
    /// The caller interrupted the task and the agent stopped.
    Interrupted,
}

impl TaskStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

impl From<CompletionStatus> for TaskStatus {
    fn from(status: CompletionStatus) -> Self {
        match status {
            CompletionStatus::Success | CompletionStatus::Blocked | CompletionStatus::Partial => {
                Self::Completed
            }
            CompletionStatus::Error => Self::Failed,
            CompletionStatus::Interrupted => Self::Interrupted,
            CompletionStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// Terminal status reported for a finished task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// The request was fulfilled.
    Success,
    /// The agent cannot proceed without outside help.
    Blocked,
    /// Some of the request was done; the rest is listed as remaining work.
    Partial,
    /// The agent or its process failed.
    Error,
    /// Stopped after an interrupt request.
    Interrupted,
    /// Stopped by cancellation.
    Cancelled,
}

impl CompletionStatus {
    /// Whether the agent itself may report this status via the completion tool.
    #[must_use]
    pub fn is_agent_verdict(self) -> bool {
        matches!(self, Self::Success | Self::Blocked | Self::Partial)
    }

    /// Parse a wire status string (`"success"`, `"blocked"`, …).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "blocked" => Some(Self::Blocked),
            "partial" => Some(Self::Partial),
            "error" => Some(Self::Error),
            "interrupted" => Some(Self::Interrupted),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Per-task configuration supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskConfig {
    /// Free-text request delegated to the agent.
    pub prompt: String,
    /// Agent session to resume instead of starting a new one.
    pub session_id: Option<String>,
    /// Model identifier passed to the agent CLI.
    pub model: Option<String>,
    /// Working directory override; defaults to the configured workspace root.
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables for this task's process.
    pub env: HashMap<String, String>,
}

impl TaskConfig {
    /// Build a config carrying only a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Kind of a user-visible task message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Visible assistant prose.
    Assistant,
    /// A tool invocation or its result.
    Tool,
}

/// A user-visible message derived from the agent's output stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TaskMessage {
    /// Unique message identifier.
    pub id: String,
    /// Message kind.
    pub kind: MessageKind,
    /// Sanitized content.
    pub content: String,
    /// Human-readable tool label for tool messages.
    pub tool_name: Option<String>,
    /// Tool arguments for tool-call messages.
    pub tool_input: Option<serde_json::Value>,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
}

impl TaskMessage {
    /// Construct an assistant message.
    #[must_use]
    pub fn assistant(content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MessageKind::Assistant,
            content,
            tool_name: None,
            tool_input: None,
            timestamp: Utc::now(),
        }
    }

    /// Construct a tool message.
    #[must_use]
    pub fn tool(tool_name: String, content: String, tool_input: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MessageKind::Tool,
            content,
            tool_name: Some(tool_name),
            tool_input,
            timestamp: Utc::now(),
        }
    }
}

/// An out-of-band approval the agent is blocked on, forwarded unmodified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionRequest {
    /// Request identifier, when the agent supplies one.
    pub id: Option<String>,
    /// Tool or operation requiring approval.
    pub tool: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// The full payload as emitted by the agent.
    pub payload: serde_json::Value,
}

/// Terminal result of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskResult {
    /// Final status.
    pub status: CompletionStatus,
    /// Agent session, for resuming with a follow-up message.
    pub session_id: Option<String>,
    /// Agent-written summary of what was done.
    pub summary: Option<String>,
    /// Work the agent reported as not done.
    pub remaining_work: Option<String>,
    /// Error detail for failed tasks.
    pub error: Option<String>,
    /// Set when the status was assigned by the completion enforcer because
    /// the agent never called the completion tool.
    pub forced: bool,
}

impl TaskResult {
    /// Result carrying only a status.
    #[must_use]
    pub fn with_status(status: CompletionStatus) -> Self {
        Self {
            status,
            session_id: None,
            summary: None,
            remaining_work: None,
            error: None,
            forced: false,
        }
    }

    /// Failed result with an error message.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(CompletionStatus::Error)
        }
    }
}

/// A task tracked by the task manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Caller-assigned identifier.
    pub id: String,
    /// Free-text request.
    pub prompt: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Agent session, once established.
    pub session_id: Option<String>,
    /// User-visible messages in emission order.
    pub messages: Vec<TaskMessage>,
    /// Terminal result, once finished.
    pub result: Option<TaskResult>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status change or message.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Construct a task in `status`.
    #[must_use]
    pub fn new(id: String, config: &TaskConfig, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            id,
            prompt: config.prompt.clone(),
            status,
            session_id: config.session_id.clone(),
            messages: Vec::new(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self.status, next),
            (
                TaskStatus::Queued,
                TaskStatus::Running | TaskStatus::Cancelled | TaskStatus::Failed
            ) | (
                TaskStatus::Running,
                TaskStatus::Completed
                    | TaskStatus::Failed
                    | TaskStatus::Cancelled
                    | TaskStatus::Interrupted
            )
        )
    }

    /// Apply `next` if permitted. Returns whether the status changed.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    /// Append user-visible messages.
    pub fn push_messages(&mut self, messages: &[TaskMessage]) {
        if messages.is_empty() {
            return;
        }
        self.messages.extend_from_slice(messages);
        self.updated_at = Utc::now();
    }
}
