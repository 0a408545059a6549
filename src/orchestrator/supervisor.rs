//! Per-task supervisor loop.
//!
//! Each active task gets one supervisor that consumes its adapter's event
//! channel, keeps the task snapshot current, drives the completion enforcer
//! and invokes the caller's callbacks. The loop ends when the task reaches a
//! terminal status or when the task manager cancels it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterEvent, AgentAdapter};
use crate::models::progress::{ProgressStage, TaskProgress};
use crate::models::task::{TaskResult, TaskStatus};
use crate::orchestrator::callbacks::TaskCallbacks;
use crate::orchestrator::completion::{CompletionEnforcer, Decision};
use crate::orchestrator::task_manager::Inner;

/// Outcome of handling one event.
enum Flow {
    Continue,
    Finish(TaskResult),
}

pub(crate) struct Supervisor {
    pub(crate) task_id: String,
    pub(crate) adapter: Arc<dyn AgentAdapter>,
    pub(crate) callbacks: Arc<dyn TaskCallbacks>,
    pub(crate) enforcer: CompletionEnforcer,
    pub(crate) events: mpsc::Receiver<AdapterEvent>,
    pub(crate) cancel: CancellationToken,
    pub(crate) manager: Arc<Inner>,
}

impl Supervisor {
    pub(crate) async fn run(mut self) {
        self.callbacks
            .on_status_change(&self.task_id, TaskStatus::Running);

        loop {
            let event = tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!("supervisor: task removed, stopping");
                    return;
                }

                event = self.events.recv() => event,
            };

            let Some(event) = event else {
                warn!("supervisor: adapter event channel closed");
                let result = TaskResult::failed("agent adapter stopped unexpectedly");
                self.manager.finish(&self.task_id, result).await;
                return;
            };

            if let Flow::Finish(result) = self.handle(event).await {
                self.manager.finish(&self.task_id, result).await;
                return;
            }
        }
    }

    async fn handle(&mut self, event: AdapterEvent) -> Flow {
        let task_id = self.task_id.as_str();
        match event {
            AdapterEvent::Messages(batch) => {
                if batch.is_empty() {
                    return Flow::Continue;
                }
                self.enforcer.note_activity();
                self.manager.record_messages(task_id, &batch).await;
                self.callbacks.on_message(task_id, &batch);
            }
            AdapterEvent::Progress(progress) => self.callbacks.on_progress(task_id, &progress),
            AdapterEvent::PermissionRequest(request) => {
                info!(tool = ?request.tool, "agent requested permission");
                self.callbacks.on_permission_request(task_id, &request);
            }
            AdapterEvent::Complete(part) => {
                debug!(status = ?part.status, "cli reported completion");
                if let Some(session_id) = &part.session_id {
                    self.manager.record_session(task_id, session_id).await;
                }
                return Flow::Finish(self.enforcer.resolve_complete(&part));
            }
            AdapterEvent::Error(message) => {
                warn!(error = %message, "agent reported an error");
                return Flow::Finish(TaskResult::failed(message));
            }
            AdapterEvent::SessionEstablished(session_id) => {
                info!(session_id = %session_id, "agent session established");
                self.manager.record_session(task_id, &session_id).await;
            }
            AdapterEvent::ToolActivity { tool } => {
                debug!(tool = %tool, "agent tool activity");
                self.enforcer.note_activity();
            }
            AdapterEvent::CompletionSignaled(input) => {
                if self.enforcer.on_completion_tool(&input) {
                    self.callbacks.on_progress(
                        task_id,
                        &TaskProgress::stage(ProgressStage::Finishing),
                    );
                } else {
                    self.callbacks
                        .on_debug(task_id, &format!("ignored completion call: {input}"));
                }
            }
            AdapterEvent::TodosUpdated(todos) => self.enforcer.note_todos(todos),
            AdapterEvent::StepFinished { reason } => {
                return self.on_step_finish(reason.as_deref()).await;
            }
            AdapterEvent::InterruptRequested => self.enforcer.note_interrupt(),
            AdapterEvent::Debug(line) => self.callbacks.on_debug(task_id, &line),
            AdapterEvent::Exited { code } => {
                info!(code, "agent process exited before reporting completion");
                return Flow::Finish(self.enforcer.on_exit(code));
            }
        }
        Flow::Continue
    }

    async fn on_step_finish(&mut self, reason: Option<&str>) -> Flow {
        match self.enforcer.on_step_finish(reason) {
            Decision::Wait => Flow::Continue,
            Decision::Finish(result) => Flow::Finish(result),
            Decision::Continue { prompt, attempt } => {
                self.callbacks.on_progress(
                    &self.task_id,
                    &TaskProgress::stage(ProgressStage::Continuing { attempt }),
                );
                // A failed write means the process is gone; its exit event
                // resolves the task.
                if let Err(err) = self.adapter.send_response(&prompt).await {
                    warn!(attempt, error = %err, "failed to inject continuation prompt");
                }
                Flow::Continue
            }
        }
    }
}
