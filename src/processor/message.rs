//! Conversion of stream events into user-visible task messages.

use serde_json::Value;

use crate::models::task::TaskMessage;
use crate::processor::sanitize::{
    sanitize_assistant_text, sanitize_tool_output_with_limit, DEFAULT_TOOL_OUTPUT_CHARS,
};
use crate::processor::tools::get_tool_display_name;
use crate::stream::event::StreamEvent;

/// Input keys tried, in order, when summarising a tool call for display.
const SUMMARY_KEYS: &[&str] = &[
    "description",
    "command",
    "url",
    "file_path",
    "filePath",
    "path",
    "pattern",
    "query",
    "selector",
    "text",
];

/// Knobs for tool output rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOptions {
    /// Keep tool output untruncated.
    pub verbose: bool,
    /// Character budget for non-verbose tool output.
    pub max_tool_output_chars: usize,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            max_tool_output_chars: DEFAULT_TOOL_OUTPUT_CHARS,
        }
    }
}

/// Convert a stream event into a user-visible message with default options.
///
/// Returns `None` when the event carries nothing the user should see.
#[must_use]
pub fn to_task_message(event: &StreamEvent) -> Option<TaskMessage> {
    to_task_message_with(event, MessageOptions::default())
}

/// Convert a stream event into a user-visible message.
///
/// - Text: sanitized; `None` if only internal markup remains.
/// - Tool call: `None` for hidden tools; otherwise labelled with a short
///   summary of its input.
/// - Tool result: `None` for hidden tools or empty output; otherwise the
///   sanitized output.
/// - Every other event: `None`.
#[must_use]
pub fn to_task_message_with(event: &StreamEvent, options: MessageOptions) -> Option<TaskMessage> {
    match event {
        StreamEvent::Text { text } => sanitize_assistant_text(text).map(TaskMessage::assistant),
        StreamEvent::ToolCall(call) => {
            let label = get_tool_display_name(&call.tool)?;
            Some(TaskMessage::tool(
                label.to_owned(),
                summarize_tool_input(&call.input),
                Some(call.input.clone()),
            ))
        }
        StreamEvent::ToolResult(result) => {
            let label = match result.tool.as_deref() {
                Some(tool) => get_tool_display_name(tool)?.to_owned(),
                None => "Tool result".to_owned(),
            };
            let output = sanitize_tool_output_with_limit(
                &result.output,
                options.verbose,
                options.max_tool_output_chars,
            );
            if output.is_empty() {
                return None;
            }
            let content = if result.is_error {
                format!("Error: {output}")
            } else {
                output
            };
            Some(TaskMessage::tool(label, content, None))
        }
        StreamEvent::SessionStarted { .. }
        | StreamEvent::RawText { .. }
        | StreamEvent::StepFinish { .. }
        | StreamEvent::PermissionRequest(_)
        | StreamEvent::Complete(_)
        | StreamEvent::Error { .. } => None,
    }
}

/// One-line description of a tool call's input.
#[must_use]
pub fn summarize_tool_input(input: &Value) -> String {
    let Value::Object(map) = input else {
        return String::new();
    };
    SUMMARY_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .map(|s| s.lines().next().unwrap_or_default().trim().to_owned())
        .unwrap_or_default()
}
