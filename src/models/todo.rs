//! Todo items surfaced by the agent through its todo tool.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Status of a single todo item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    /// Not yet started.
    Pending,
    /// Currently being worked on.
    InProgress,
    /// Done.
    Completed,
    /// Dropped by the agent.
    Cancelled,
}

/// A single item in an agent's todo list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TodoItem {
    /// Human-readable description.
    pub content: String,
    /// Current status.
    pub status: TodoStatus,
}

impl TodoItem {
    /// Whether the item still needs work.
    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        matches!(self.status, TodoStatus::Pending | TodoStatus::InProgress)
    }
}

#[derive(Debug, Deserialize)]
struct TodoWriteInput {
    todos: Vec<TodoItem>,
}

/// Parse the `todos` list from a todo tool's input arguments.
///
/// # Errors
///
/// Returns `AppError::Stream` if the input has no well-formed `todos` array
/// or any item has an empty description.
pub fn parse_todo_input(input: &serde_json::Value) -> Result<Vec<TodoItem>> {
    let parsed: TodoWriteInput = serde_json::from_value(input.clone())
        .map_err(|e| AppError::Stream(format!("invalid todo input: {e}")))?;
    validate_snapshot(&parsed.todos)?;
    Ok(parsed.todos)
}

/// Validate that a todo snapshot contains well-formed items.
///
/// # Errors
///
/// Returns `AppError::Stream` if any item has an empty description.
pub fn validate_snapshot(items: &[TodoItem]) -> Result<()> {
    for item in items {
        if item.content.trim().is_empty() {
            return Err(AppError::Stream(
                "todo item content must not be empty".into(),
            ));
        }
    }
    Ok(())
}
