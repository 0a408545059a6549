//! Per-task completion enforcement.
//!
//! Every task must end with an explicit verdict from the agent, given by
//! calling the completion tool with a status of `success`, `blocked` or
//! `partial`. [`CompletionEnforcer`] watches a task's events and:
//!
//! - records the verdict when the tool is called ([`CompletionState::Signaled`]);
//! - when the agent ends a turn without one, asks the supervisor to inject a
//!   continuation prompt, up to `max_continuation_attempts` times;
//! - once the attempts are used up, or the process exits without a verdict,
//!   assigns a terminal status itself ([`CompletionState::Forced`]).
//!
//! Transitions are one-directional. After `Signaled` or `Forced` no further
//! prompt is ever injected.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::CompletionConfig;
use crate::models::task::{CompletionStatus, TaskResult};
use crate::models::todo::TodoItem;
use crate::stream::event::CompletePart;
use crate::{AppError, Result};

/// Enforcement state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// No verdict yet.
    AwaitingSignal,
    /// The agent called the completion tool with a valid status.
    Signaled,
    /// The enforcer assigned a terminal status.
    Forced,
}

/// Arguments of a completion tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSignal {
    /// `success`, `blocked` or `partial`.
    pub status: CompletionStatus,
    /// The agent's restatement of the request.
    pub original_request_summary: Option<String>,
    /// What was done.
    pub summary: Option<String>,
    /// What was left undone.
    pub remaining_work: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSignal {
    status: String,
    #[serde(default)]
    original_request_summary: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    remaining_work: Option<String>,
}

impl CompletionSignal {
    /// Parse the completion tool's arguments.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Stream` if the arguments are malformed or the status
    /// is not one the agent may report.
    pub fn from_tool_input(input: &Value) -> Result<Self> {
        let wire: WireSignal = serde_json::from_value(input.clone())
            .map_err(|e| AppError::Stream(format!("invalid completion call: {e}")))?;
        let status = CompletionStatus::parse(&wire.status)
            .filter(|s| s.is_agent_verdict())
            .ok_or_else(|| {
                AppError::Stream(format!("invalid completion status: {}", wire.status))
            })?;
        Ok(Self {
            status,
            original_request_summary: non_empty(wire.original_request_summary),
            summary: non_empty(wire.summary),
            remaining_work: non_empty(wire.remaining_work),
        })
    }

    fn to_result(&self) -> TaskResult {
        TaskResult {
            summary: self.summary.clone(),
            remaining_work: self.remaining_work.clone(),
            ..TaskResult::with_status(self.status)
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Maps a forced completion to a terminal status.
///
/// Configured as `[completion.forced_status]`; either key may be omitted.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct ForcedStatusPolicy {
    /// Status when the agent produced visible text or called tools.
    pub with_activity: CompletionStatus,
    /// Status when the agent produced nothing.
    pub without_activity: CompletionStatus,
}

impl Default for ForcedStatusPolicy {
    fn default() -> Self {
        Self {
            with_activity: CompletionStatus::Partial,
            without_activity: CompletionStatus::Error,
        }
    }
}

impl ForcedStatusPolicy {
    /// Whether both statuses are ones a forced completion may carry.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        [self.with_activity, self.without_activity]
            .iter()
            .all(|status| status.is_agent_verdict() || *status == CompletionStatus::Error)
    }

    /// Status for a forced completion.
    #[must_use]
    pub fn status(&self, activity_seen: bool) -> CompletionStatus {
        if activity_seen {
            self.with_activity
        } else {
            self.without_activity
        }
    }
}

/// What the supervisor should do after a step finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Write `prompt` to the agent.
    Continue {
        /// Continuation prompt.
        prompt: String,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// End the task with this result.
    Finish(TaskResult),
    /// Nothing to do; the agent is still working.
    Wait,
}

/// Completion state machine for one task.
#[derive(Debug, Clone)]
pub struct CompletionEnforcer {
    state: CompletionState,
    attempts: u32,
    max_attempts: u32,
    prompt: String,
    policy: ForcedStatusPolicy,
    signal: Option<CompletionSignal>,
    todos: Vec<TodoItem>,
    activity_seen: bool,
    interrupt_requested: bool,
}

impl CompletionEnforcer {
    /// Enforcer with the configured attempts, prompt and forced-status policy.
    #[must_use]
    pub fn new(config: &CompletionConfig) -> Self {
        Self {
            state: CompletionState::AwaitingSignal,
            attempts: 0,
            max_attempts: config.max_continuation_attempts,
            prompt: config.continuation_prompt.clone(),
            policy: config.forced_status,
            signal: None,
            todos: Vec::new(),
            activity_seen: false,
            interrupt_requested: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CompletionState {
        self.state
    }

    /// Continuation prompts injected so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The recorded verdict, if any.
    #[must_use]
    pub fn signal(&self) -> Option<&CompletionSignal> {
        self.signal.as_ref()
    }

    /// Latest todo snapshot.
    #[must_use]
    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    /// Record visible output or tool use.
    pub fn note_activity(&mut self) {
        self.activity_seen = true;
    }

    /// Replace the todo snapshot.
    pub fn note_todos(&mut self, todos: Vec<TodoItem>) {
        self.todos = todos;
    }

    /// Record that the caller interrupted the task.
    pub fn note_interrupt(&mut self) {
        self.interrupt_requested = true;
    }

    /// Handle a completion tool call.
    ///
    /// Returns `true` if the call produced a verdict. Calls with an invalid
    /// status, or made after a verdict or forced completion, are ignored.
    pub fn on_completion_tool(&mut self, input: &Value) -> bool {
        if self.state != CompletionState::AwaitingSignal {
            debug!(state = ?self.state, "ignoring completion call after terminal state");
            return false;
        }
        match CompletionSignal::from_tool_input(input) {
            Ok(signal) => {
                info!(status = ?signal.status, "agent signaled completion");
                self.signal = Some(signal);
                self.state = CompletionState::Signaled;
                true
            }
            Err(err) => {
                debug!(error = %err, "ignoring completion call");
                false
            }
        }
    }

    /// Handle the end of a reasoning step.
    ///
    /// Steps that end in tool calls are not turn ends and never trigger
    /// enforcement.
    pub fn on_step_finish(&mut self, reason: Option<&str>) -> Decision {
        if !is_turn_end(reason) {
            return Decision::Wait;
        }

        match self.state {
            CompletionState::Forced => Decision::Wait,
            CompletionState::Signaled => Decision::Finish(self.signaled_result()),
            CompletionState::AwaitingSignal if self.interrupt_requested => {
                self.state = CompletionState::Forced;
                Decision::Finish(TaskResult::with_status(CompletionStatus::Interrupted))
            }
            CompletionState::AwaitingSignal if self.attempts < self.max_attempts => {
                self.attempts += 1;
                info!(
                    attempt = self.attempts,
                    max_attempts = self.max_attempts,
                    "turn ended without completion signal, injecting continuation"
                );
                Decision::Continue {
                    prompt: self.prompt.clone(),
                    attempt: self.attempts,
                }
            }
            CompletionState::AwaitingSignal => {
                info!(
                    attempts = self.attempts,
                    "continuation attempts exhausted, forcing completion"
                );
                Decision::Finish(self.force(None))
            }
        }
    }

    /// Resolve a `complete` event reported by the CLI.
    pub fn resolve_complete(&mut self, part: &CompletePart) -> TaskResult {
        let mut result = match part.status {
            CompletionStatus::Success => self.resolve_without_failure(None),
            CompletionStatus::Blocked | CompletionStatus::Partial => {
                if self.state == CompletionState::Signaled {
                    self.signaled_result()
                } else {
                    self.state = CompletionState::Forced;
                    TaskResult {
                        remaining_work: self.outstanding_todos(),
                        forced: true,
                        ..TaskResult::with_status(part.status)
                    }
                }
            }
            CompletionStatus::Error
            | CompletionStatus::Interrupted
            | CompletionStatus::Cancelled => {
                if self.state == CompletionState::AwaitingSignal {
                    self.state = CompletionState::Forced;
                }
                TaskResult {
                    error: part.error.clone(),
                    ..TaskResult::with_status(part.status)
                }
            }
        };
        if result.session_id.is_none() {
            result.session_id.clone_from(&part.session_id);
        }
        result
    }

    /// Resolve the process exiting before any other terminal event.
    pub fn on_exit(&mut self, code: Option<i32>) -> TaskResult {
        let detail = match code {
            Some(0) => None,
            Some(code) => Some(format!("agent process exited with code {code}")),
            None => Some("agent process terminated by signal".to_owned()),
        };
        self.resolve_without_failure(detail)
    }

    fn resolve_without_failure(&mut self, detail: Option<String>) -> TaskResult {
        match self.state {
            CompletionState::Signaled => self.signaled_result(),
            _ if self.interrupt_requested => {
                self.state = CompletionState::Forced;
                TaskResult::with_status(CompletionStatus::Interrupted)
            }
            _ => self.force(detail),
        }
    }

    fn signaled_result(&self) -> TaskResult {
        self.signal
            .as_ref()
            .map_or_else(|| self.outstanding_result(), CompletionSignal::to_result)
    }

    fn outstanding_result(&self) -> TaskResult {
        TaskResult {
            remaining_work: self.outstanding_todos(),
            ..TaskResult::with_status(self.policy.status(self.activity_seen))
        }
    }

    fn force(&mut self, detail: Option<String>) -> TaskResult {
        self.state = CompletionState::Forced;
        let status = self.policy.status(self.activity_seen);
        let error = match (status, detail) {
            (CompletionStatus::Error, None) => {
                Some("agent stopped without reporting completion".to_owned())
            }
            (_, detail) => detail,
        };
        TaskResult {
            error,
            forced: true,
            ..self.outstanding_result()
        }
    }

    fn outstanding_todos(&self) -> Option<String> {
        let lines: Vec<String> = self
            .todos
            .iter()
            .filter(|item| item.is_outstanding())
            .map(|item| format!("- {}", item.content))
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

fn is_turn_end(reason: Option<&str>) -> bool {
    !matches!(reason, Some("tool_calls" | "tool-calls" | "tool_use"))
}
