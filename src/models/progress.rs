//! Lifecycle stage markers reported while a task runs.

use serde::{Deserialize, Serialize};

/// Coarse stage of a running task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum ProgressStage {
    /// The agent process is being spawned.
    Starting,
    /// The agent reported its session.
    Connected,
    /// The agent is producing text.
    Thinking,
    /// The agent invoked a tool.
    ToolUse {
        /// Display label of the tool.
        tool: String,
    },
    /// A continuation prompt was injected.
    Continuing {
        /// 1-based continuation attempt.
        attempt: u32,
    },
    /// The agent is wrapping up.
    Finishing,
}

/// A progress update delivered to `on_progress`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskProgress {
    /// Current stage.
    #[serde(flatten)]
    pub stage: ProgressStage,
    /// Optional human-readable detail.
    pub message: Option<String>,
}

impl TaskProgress {
    /// Progress update without detail text.
    #[must_use]
    pub fn stage(stage: ProgressStage) -> Self {
        Self {
            stage,
            message: None,
        }
    }

    /// Progress update with detail text.
    #[must_use]
    pub fn with_message(stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: Some(message.into()),
        }
    }
}
