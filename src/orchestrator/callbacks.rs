//! Caller-supplied callback set for one task.

use crate::models::progress::TaskProgress;
use crate::models::task::{PermissionRequest, TaskMessage, TaskResult, TaskStatus};

/// Receives a task's events. Every method defaults to a no-op.
///
/// Callbacks run on the task's supervisor loop; they must return quickly or
/// the agent's output backs up behind them.
pub trait TaskCallbacks: Send + Sync {
    /// A batch of user-visible messages, in emission order.
    fn on_message(&self, task_id: &str, messages: &[TaskMessage]) {
        let _ = (task_id, messages);
    }

    /// A lifecycle stage marker.
    fn on_progress(&self, task_id: &str, progress: &TaskProgress) {
        let _ = (task_id, progress);
    }

    /// The agent is blocked on an out-of-band approval.
    fn on_permission_request(&self, task_id: &str, request: &PermissionRequest) {
        let _ = (task_id, request);
    }

    /// The task reached a terminal status.
    fn on_complete(&self, task_id: &str, result: &TaskResult) {
        let _ = (task_id, result);
    }

    /// The task failed.
    fn on_error(&self, task_id: &str, error: &str) {
        let _ = (task_id, error);
    }

    /// The task moved to `status`.
    fn on_status_change(&self, task_id: &str, status: TaskStatus) {
        let _ = (task_id, status);
    }

    /// Diagnostic output from the agent.
    fn on_debug(&self, task_id: &str, line: &str) {
        let _ = (task_id, line);
    }
}

/// Callback set that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl TaskCallbacks for NoopCallbacks {}
