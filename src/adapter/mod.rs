//! Process adapter abstraction.
//!
//! An [`AgentAdapter`] owns exactly one external agent process for the
//! lifetime of one task. It reports what the agent does as [`AdapterEvent`]s
//! on an explicit `mpsc` channel that a single supervisor loop consumes, so
//! no callback closures are registered on the process itself.
//!
//! [`AdapterFactory`] is the seam the task manager uses to create adapters;
//! it is also where CLI availability is checked, before any process exists.

pub mod cli;
pub mod environment;
pub mod spawner;
pub mod translate;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::progress::TaskProgress;
use crate::models::task::{PermissionRequest, TaskConfig, TaskMessage};
use crate::models::todo::TodoItem;
use crate::stream::event::CompletePart;
use crate::Result;

/// Capacity of each adapter's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events an adapter emits towards its task's supervisor.
///
/// The first five variants are the outward categories delivered to caller
/// callbacks; the rest are observations consumed by the supervisor and the
/// completion enforcer.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// A batch of user-visible messages, in emission order.
    Messages(Vec<TaskMessage>),
    /// Lifecycle stage marker.
    Progress(TaskProgress),
    /// The agent is blocked on an out-of-band approval.
    PermissionRequest(PermissionRequest),
    /// The CLI reported a terminal result.
    Complete(CompletePart),
    /// The agent reported an unrecoverable failure.
    Error(String),
    /// The agent reported its session identifier.
    SessionEstablished(String),
    /// The agent invoked a tool, hidden or not.
    ToolActivity {
        /// Raw tool identifier.
        tool: String,
    },
    /// The agent invoked the completion tool with these arguments.
    CompletionSignaled(serde_json::Value),
    /// The agent published a new todo list snapshot.
    TodosUpdated(Vec<TodoItem>),
    /// The agent finished a reasoning step.
    StepFinished {
        /// Why the step ended, when reported.
        reason: Option<String>,
    },
    /// A soft interrupt was sent to the agent.
    InterruptRequested,
    /// Diagnostic output (stderr lines, non-JSON stdout lines).
    Debug(String),
    /// The agent process exited; all of its output has been delivered.
    Exited {
        /// Exit code, or `None` when killed by a signal.
        code: Option<i32>,
    },
}

/// One external agent process bound to one task.
///
/// All methods take `&self`; implementations keep their mutable state behind
/// interior locks so the adapter can be shared between the task manager and
/// the task's supervisor.
pub trait AgentAdapter: Send + Sync {
    /// Spawn the agent process for `config` and begin streaming its output.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`](crate::AppError::Process) if the process
    /// cannot be spawned, or if the adapter was already started.
    fn start(&self, config: TaskConfig) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Write an operator message (or continuation prompt) to the agent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NoActiveProcess`](crate::AppError::NoActiveProcess)
    /// if the adapter was never started or has been disposed.
    fn send_response(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask the agent to stop its current work while still reporting a result.
    ///
    /// No-op when no process is running.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`](crate::AppError::Process) if the signal
    /// cannot be delivered.
    fn interrupt(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Terminate the agent process (soft signal, grace period, hard kill) and
    /// dispose the adapter without waiting for a result.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`](crate::AppError::Process) if signalling
    /// fails.
    fn cancel(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Release the process and I/O tasks, flushing pending messages.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Implementations return `Ok(())` for repeated calls.
    fn dispose(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Session identifier reported by the agent (or supplied for resumption).
    fn session_id(&self) -> Option<String>;
}

/// Creates one adapter per task.
pub trait AdapterFactory: Send + Sync {
    /// Build an adapter for `task_id` that reports on `events`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::CliNotFound`](crate::AppError::CliNotFound) if the
    /// agent executable cannot be located.
    fn create(
        &self,
        task_id: &str,
        events: mpsc::Sender<AdapterEvent>,
    ) -> Result<Arc<dyn AgentAdapter>>;
}
