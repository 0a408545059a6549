//! Time-windowed message batching.
//!
//! The agent can emit dozens of small events per second. [`MessageBatcher`]
//! holds messages for a short window after the first one arrives so callers
//! receive them as one batch instead of one callback per event.

use std::time::Duration;

use tokio::time::Instant;

use crate::models::task::TaskMessage;

/// Coalesces messages arriving within a fixed window.
///
/// The batcher is passive: it records when the pending batch becomes due and
/// the owner decides when to [`flush`](Self::flush), typically by sleeping
/// until [`deadline`](Self::deadline).
#[derive(Debug)]
pub struct MessageBatcher {
    window: Duration,
    pending: Vec<TaskMessage>,
    deadline: Option<Instant>,
}

impl MessageBatcher {
    /// Create an empty batcher with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Vec::new(),
            deadline: None,
        }
    }

    /// Add a message. The first message of a batch starts the window.
    pub fn push(&mut self, message: TaskMessage) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.window);
        }
        self.pending.push(message);
    }

    /// Whether no messages are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of pending messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// When the pending batch becomes due; `None` if nothing is pending.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the pending batch is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Take every pending message in arrival order and reset the window.
    pub fn flush(&mut self) -> Vec<TaskMessage> {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }
}
