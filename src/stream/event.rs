//! Typed events decoded from the agent's NDJSON output.
//!
//! Each line is an envelope `{ "type": …, "part": { … }, "sessionID"?: … }`.
//! The `type` strings map onto the closed [`StreamEvent`] enum; adding a new
//! event kind is a compile-time-checked change for every consumer.
//!
//! | `type`               | Maps to                             |
//! |----------------------|-------------------------------------|
//! | `text`               | [`StreamEvent::Text`]               |
//! | `tool_call`          | [`StreamEvent::ToolCall`]           |
//! | `tool_result`        | [`StreamEvent::ToolResult`]         |
//! | `step_finish`        | [`StreamEvent::StepFinish`]         |
//! | `permission_request` | [`StreamEvent::PermissionRequest`]  |
//! | `complete`           | [`StreamEvent::Complete`]           |
//! | `error`              | [`StreamEvent::Error`]              |
//! | `step_start`         | session announcement only           |
//! | *(non-JSON/unknown)* | [`StreamEvent::RawText`]            |

use serde::Deserialize;
use serde_json::Value;

use crate::models::task::{CompletionStatus, PermissionRequest};

/// A discrete event decoded from the agent stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The agent reported a session identifier for the first time (or a new one).
    SessionStarted {
        /// Opaque resumption token.
        session_id: String,
    },
    /// Assistant text.
    Text {
        /// Unsanitized text as emitted.
        text: String,
    },
    /// A line that was not a recognised JSON event, kept for diagnostics.
    RawText {
        /// The line as received (or a parse-failure marker).
        line: String,
    },
    /// The agent invoked a tool.
    ToolCall(ToolCallPart),
    /// A tool returned.
    ToolResult(ToolResultPart),
    /// The agent finished one reasoning step.
    StepFinish {
        /// Why the step ended (`stop`, `tool_calls`, …), when reported.
        reason: Option<String>,
    },
    /// The agent is blocked on an out-of-band approval.
    PermissionRequest(PermissionRequest),
    /// The CLI reported a terminal result.
    Complete(CompletePart),
    /// The CLI reported an unrecoverable error.
    Error {
        /// Error description.
        message: String,
    },
}

/// Payload of a `tool_call` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallPart {
    /// Correlation id linking the call to its result.
    #[serde(default, alias = "callID", alias = "call_id")]
    pub id: Option<String>,
    /// Tool identifier.
    #[serde(alias = "name")]
    pub tool: String,
    /// Tool arguments.
    #[serde(default, alias = "args", alias = "arguments")]
    pub input: Value,
}

/// Payload of a `tool_result` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultPart {
    /// Correlation id of the originating call.
    pub id: Option<String>,
    /// Tool identifier, when repeated on the result.
    pub tool: Option<String>,
    /// Raw tool output.
    pub output: String,
    /// Whether the tool reported failure.
    pub is_error: bool,
}

/// Payload of a `complete` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletePart {
    /// Terminal status.
    pub status: CompletionStatus,
    /// Session to resume with a follow-up message.
    pub session_id: Option<String>,
    /// Error detail.
    pub error: Option<String>,
}

// ── Wire payloads ─────────────────────────────────────────────────────────────

/// Top-level envelope of every NDJSON line.
#[derive(Debug, Deserialize)]
pub(crate) struct WireEnvelope {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) part: Value,
    #[serde(default, alias = "sessionID", alias = "sessionId")]
    pub(crate) session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireText {
    #[serde(default)]
    pub(crate) text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireToolResult {
    #[serde(default, alias = "callID", alias = "call_id")]
    pub(crate) id: Option<String>,
    #[serde(default, alias = "name")]
    pub(crate) tool: Option<String>,
    #[serde(default)]
    pub(crate) output: Value,
    #[serde(default)]
    pub(crate) error: Option<Value>,
    #[serde(default, alias = "isError")]
    pub(crate) is_error: bool,
    #[serde(default)]
    pub(crate) status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireStepFinish {
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WirePermission {
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default, alias = "permission", alias = "type")]
    pub(crate) tool: Option<String>,
    #[serde(default, alias = "title", alias = "message")]
    pub(crate) description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireComplete {
    pub(crate) status: String,
    #[serde(default, alias = "sessionId", alias = "sessionID")]
    pub(crate) session_id: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<Value>,
}

/// Render a JSON value as display text: strings verbatim, `null` as empty,
/// everything else as compact JSON.
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| value.to_string(), str::to_owned),
        other => other.to_string(),
    }
}
