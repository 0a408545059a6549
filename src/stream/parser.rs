//! Incremental stream parser.
//!
//! [`StreamParser`] reassembles arbitrary byte chunks from the agent's stdout
//! into complete lines, then decodes each line into a [`StreamEvent`]. A
//! trailing partial line is kept across [`feed`](StreamParser::feed) calls.
//!
//! Nothing the subprocess prints is dropped silently: a line that is not a
//! recognised JSON event becomes [`StreamEvent::RawText`], and an oversized
//! unterminated line produces one `RawText` parse-failure marker while its
//! bytes are discarded up to the next newline.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::models::task::{CompletionStatus, PermissionRequest};
use crate::stream::codec::{NdjsonCodec, MAX_LINE_BYTES};
use crate::stream::event::{
    value_to_text, CompletePart, StreamEvent, ToolCallPart, ToolResultPart, WireComplete,
    WireEnvelope, WirePermission, WireStepFinish, WireText, WireToolResult,
};
use crate::AppError;

/// One decoded line: an optional session announcement and an optional event.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// Session id carried by the envelope or the complete payload.
    pub session_id: Option<String>,
    /// The decoded event; `None` for pure session announcements (`step_start`).
    pub event: Option<StreamEvent>,
}

impl ParsedLine {
    fn event(event: StreamEvent) -> Self {
        Self {
            session_id: None,
            event: Some(event),
        }
    }
}

/// Stateful line reassembler and event decoder. One instance per adapter.
#[derive(Debug)]
pub struct StreamParser {
    codec: NdjsonCodec,
    buffer: BytesMut,
    session_id: Option<String>,
}

impl StreamParser {
    /// Create a parser with the default [`MAX_LINE_BYTES`] line cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    /// Create a parser with a custom line cap.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            codec: NdjsonCodec::with_max_line_bytes(max_line_bytes),
            buffer: BytesMut::new(),
            session_id: None,
        }
    }

    /// Feed a chunk of raw output and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => self.push_line(&line, &mut events),
                Ok(None) => break,
                Err(err) => push_failure(&err, &mut events),
            }
        }
        events
    }

    /// Drain the final unterminated line at end of stream.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        loop {
            match self.codec.decode_eof(&mut self.buffer) {
                Ok(Some(line)) => self.push_line(&line, &mut events),
                Ok(None) => break,
                Err(err) => {
                    push_failure(&err, &mut events);
                    // The inner codec may be mid-discard; nothing more to recover.
                    self.buffer.clear();
                    break;
                }
            }
        }
        events
    }

    /// The most recently announced session id.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Bytes currently held as an incomplete line.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn push_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        let Some(parsed) = parse_line(line) else {
            return;
        };

        if let Some(session_id) = parsed.session_id {
            if self.session_id.as_deref() != Some(session_id.as_str()) {
                self.session_id = Some(session_id.clone());
                events.push(StreamEvent::SessionStarted { session_id });
            }
        }

        if let Some(event) = parsed.event {
            events.push(event);
        }
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

fn push_failure(err: &AppError, events: &mut Vec<StreamEvent>) {
    debug!(error = %err, "stream parser: line rejected by codec");
    events.push(StreamEvent::RawText {
        line: format!("[unparseable output: {err}]"),
    });
}

/// Decode a single NDJSON line.
///
/// Returns `None` for blank lines. Lines that are not JSON objects with a
/// string `type`, or whose `type` is unknown, or whose payload does not match
/// its type, become [`StreamEvent::RawText`] carrying the original line.
#[must_use]
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let raw = || ParsedLine::event(StreamEvent::RawText {
        line: line.to_owned(),
    });

    let Ok(envelope) = serde_json::from_str::<WireEnvelope>(trimmed) else {
        return Some(raw());
    };

    let WireEnvelope {
        kind,
        part,
        session_id,
    } = envelope;

    let decoded = match kind.as_str() {
        "step_start" => Some(ParsedLine {
            session_id: None,
            event: None,
        }),
        "text" => decode_text(part),
        "tool_call" => decode_tool_call(part),
        "tool_result" => decode_tool_result(part),
        "step_finish" => decode_step_finish(part),
        "permission_request" => Some(decode_permission(part)),
        "complete" => decode_complete(part),
        "error" => Some(decode_error(&part)),
        other => {
            debug!(kind = other, "stream parser: unknown event type, forwarding raw");
            None
        }
    };

    let mut parsed = decoded.unwrap_or_else(raw);
    if parsed.session_id.is_none() {
        parsed.session_id = session_id;
    }
    Some(parsed)
}

// ── Per-type decoders ─────────────────────────────────────────────────────────

fn decode_text(part: Value) -> Option<ParsedLine> {
    let wire: WireText = serde_json::from_value(part).ok()?;
    Some(ParsedLine::event(StreamEvent::Text { text: wire.text }))
}

fn decode_tool_call(part: Value) -> Option<ParsedLine> {
    let call: ToolCallPart = serde_json::from_value(part).ok()?;
    Some(ParsedLine::event(StreamEvent::ToolCall(call)))
}

fn decode_tool_result(part: Value) -> Option<ParsedLine> {
    let wire: WireToolResult = serde_json::from_value(part).ok()?;
    let status_error = wire
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("error"));
    let error_text = wire.error.as_ref().map(value_to_text);
    let is_error = wire.is_error || status_error || error_text.is_some();
    let output = match (value_to_text(&wire.output), error_text) {
        (out, Some(err)) if out.is_empty() => err,
        (out, _) => out,
    };
    Some(ParsedLine::event(StreamEvent::ToolResult(ToolResultPart {
        id: wire.id,
        tool: wire.tool,
        output,
        is_error,
    })))
}

fn decode_step_finish(part: Value) -> Option<ParsedLine> {
    let wire: WireStepFinish = if part.is_null() {
        WireStepFinish { reason: None }
    } else {
        serde_json::from_value(part).ok()?
    };
    Some(ParsedLine::event(StreamEvent::StepFinish {
        reason: wire.reason,
    }))
}

fn decode_permission(part: Value) -> ParsedLine {
    let wire: WirePermission = serde_json::from_value(part.clone()).unwrap_or(WirePermission {
        id: None,
        tool: None,
        description: None,
    });
    ParsedLine::event(StreamEvent::PermissionRequest(PermissionRequest {
        id: wire.id,
        tool: wire.tool,
        description: wire.description,
        payload: part,
    }))
}

fn decode_complete(part: Value) -> Option<ParsedLine> {
    let wire: WireComplete = serde_json::from_value(part).ok()?;
    let status = CompletionStatus::parse(&wire.status)?;
    let error = wire.error.as_ref().map(value_to_text);
    Some(ParsedLine {
        session_id: wire.session_id.clone(),
        event: Some(StreamEvent::Complete(CompletePart {
            status,
            session_id: wire.session_id,
            error,
        })),
    })
}

fn decode_error(part: &Value) -> ParsedLine {
    let message = match part {
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .map_or_else(|| part.to_string(), value_to_text),
        other => value_to_text(other),
    };
    let message = if message.is_empty() {
        "agent reported an error".to_owned()
    } else {
        message
    };
    ParsedLine::event(StreamEvent::Error { message })
}
