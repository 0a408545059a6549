//! Translation of parsed stream events into adapter output.
//!
//! Each [`StreamEvent`] becomes zero or more [`Translated`] items:
//!
//! - user-visible messages, which the adapter batches;
//! - observations, supervisor-only bookkeeping delivered immediately;
//! - boundaries, anything that reaches a caller callback: the adapter flushes
//!   pending messages before delivering one, so a task's callbacks fire in
//!   the order the agent wrote its output.

use std::collections::HashMap;

use tracing::debug;

use crate::adapter::AdapterEvent;
use crate::models::progress::{ProgressStage, TaskProgress};
use crate::models::task::TaskMessage;
use crate::models::todo::parse_todo_input;
use crate::processor::message::{to_task_message_with, MessageOptions};
use crate::processor::tools::{get_tool_display_name, is_completion_tool, is_todo_tool};
use crate::stream::event::StreamEvent;

/// One unit of adapter output.
#[derive(Debug, Clone, PartialEq)]
pub enum Translated {
    /// A user-visible message for the batcher.
    Message(TaskMessage),
    /// An event delivered without flushing the batcher. Never surfaces to
    /// caller callbacks.
    Observation(AdapterEvent),
    /// An event that flushes pending messages before delivery.
    Boundary(AdapterEvent),
}

/// Per-adapter translation state.
#[derive(Debug, Default)]
pub struct EventTranslator {
    options: MessageOptions,
    /// Tool ids of calls still awaiting their result, keyed by call id.
    pending_calls: HashMap<String, String>,
    last_stage: Option<ProgressStage>,
}

impl EventTranslator {
    /// Create a translator with the given message options.
    #[must_use]
    pub fn new(options: MessageOptions) -> Self {
        Self {
            options,
            pending_calls: HashMap::new(),
            last_stage: None,
        }
    }

    /// Translate one event.
    pub fn translate(&mut self, event: StreamEvent) -> Vec<Translated> {
        let mut out = Vec::new();
        match event {
            StreamEvent::SessionStarted { session_id } => {
                out.push(Translated::Observation(AdapterEvent::SessionEstablished(
                    session_id,
                )));
                self.progress(ProgressStage::Connected, &mut out);
            }
            StreamEvent::Text { .. } => {
                if let Some(message) = to_task_message_with(&event, self.options) {
                    self.progress(ProgressStage::Thinking, &mut out);
                    out.push(Translated::Message(message));
                }
            }
            StreamEvent::RawText { line } => {
                out.push(Translated::Boundary(AdapterEvent::Debug(line)));
            }
            StreamEvent::ToolCall(ref call) => {
                if let Some(id) = &call.id {
                    self.pending_calls.insert(id.clone(), call.tool.clone());
                }
                out.push(Translated::Observation(AdapterEvent::ToolActivity {
                    tool: call.tool.clone(),
                }));

                if is_completion_tool(&call.tool) {
                    out.push(Translated::Boundary(AdapterEvent::CompletionSignaled(
                        call.input.clone(),
                    )));
                } else if is_todo_tool(&call.tool) {
                    match parse_todo_input(&call.input) {
                        Ok(items) => {
                            out.push(Translated::Observation(AdapterEvent::TodosUpdated(items)));
                        }
                        Err(err) => {
                            debug!(error = %err, "ignoring malformed todo update");
                            out.push(Translated::Boundary(AdapterEvent::Debug(format!(
                                "ignored todo update: {err}"
                            ))));
                        }
                    }
                }

                if let Some(label) = get_tool_display_name(&call.tool) {
                    self.progress(
                        ProgressStage::ToolUse {
                            tool: label.to_owned(),
                        },
                        &mut out,
                    );
                }
                if let Some(message) = to_task_message_with(&event, self.options) {
                    out.push(Translated::Message(message));
                }
            }
            StreamEvent::ToolResult(mut result) => {
                let call_tool = result
                    .id
                    .as_ref()
                    .and_then(|id| self.pending_calls.remove(id));
                if result.tool.is_none() {
                    result.tool = call_tool;
                }
                if let Some(message) =
                    to_task_message_with(&StreamEvent::ToolResult(result), self.options)
                {
                    out.push(Translated::Message(message));
                }
            }
            StreamEvent::StepFinish { reason } => {
                out.push(Translated::Boundary(AdapterEvent::StepFinished { reason }));
            }
            StreamEvent::PermissionRequest(request) => {
                out.push(Translated::Boundary(AdapterEvent::PermissionRequest(request)));
            }
            StreamEvent::Complete(part) => {
                out.push(Translated::Boundary(AdapterEvent::Complete(part)));
            }
            StreamEvent::Error { message } => {
                out.push(Translated::Boundary(AdapterEvent::Error(message)));
            }
        }
        out
    }

    /// Emit a progress marker unless it repeats the previous stage.
    fn progress(&mut self, stage: ProgressStage, out: &mut Vec<Translated>) {
        if self.last_stage.as_ref() == Some(&stage) {
            return;
        }
        self.last_stage = Some(stage.clone());
        out.push(Translated::Boundary(AdapterEvent::Progress(
            TaskProgress::stage(stage),
        )));
    }
}
