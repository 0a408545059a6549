//! FIFO overflow queue for tasks waiting on a free slot.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::task::{Task, TaskConfig, TaskStatus};
use crate::orchestrator::callbacks::TaskCallbacks;

/// A task waiting for a slot. Queued tasks have no process.
pub struct QueueEntry {
    /// Caller-assigned task identifier.
    pub task_id: String,
    /// Configuration to start the task with once promoted.
    pub config: TaskConfig,
    /// Callback set registered at `start_task`.
    pub callbacks: Arc<dyn TaskCallbacks>,
    /// When the entry was queued.
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn new(task_id: String, config: TaskConfig, callbacks: Arc<dyn TaskCallbacks>) -> Self {
        Self {
            task_id,
            config,
            callbacks,
            enqueued_at: Utc::now(),
        }
    }

    /// Snapshot of the queued task.
    #[must_use]
    pub fn to_task(&self) -> Task {
        let mut task = Task::new(self.task_id.clone(), &self.config, TaskStatus::Queued);
        task.created_at = self.enqueued_at;
        task.updated_at = self.enqueued_at;
        task
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("task_id", &self.task_id)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

/// Insertion-ordered queue with lookup by task id.
#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: VecDeque<QueueEntry>,
}

impl TaskQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail.
    pub fn push(&mut self, entry: QueueEntry) {
        self.entries.push_back(entry);
    }

    /// Take the head.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Remove the entry for `task_id`, keeping the order of the rest.
    pub fn remove(&mut self, task_id: &str) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|e| e.task_id == task_id)?;
        self.entries.remove(index)
    }

    /// 1-based position of `task_id`, or 0 if it is not queued.
    #[must_use]
    pub fn position(&self, task_id: &str) -> usize {
        self.entries
            .iter()
            .position(|e| e.task_id == task_id)
            .map_or(0, |index| index + 1)
    }

    /// Whether `task_id` is queued.
    #[must_use]
    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.iter().any(|e| e.task_id == task_id)
    }

    /// The entry for `task_id`.
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.task_id == task_id)
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every entry in queue order.
    pub fn drain(&mut self) -> Vec<QueueEntry> {
        self.entries.drain(..).collect()
    }
}
