//! Sanitizers for assistant text and tool output.
//!
//! Assistant text may contain the agent's private reasoning wrapped in a
//! fixed set of internal tags (`<thought>…</thought>` and friends). These
//! blocks are removed by an explicit scanner:
//!
//! - a self-contained block is removed wherever it appears;
//! - an orphan closing tag is removed on its own;
//! - an opening tag with no closing tag swallows the rest of the text, since
//!   in a streaming chunk it marks reasoning still in flight.
//!
//! Lines of the form `[[MARKER]]` belong to the agent protocol and are
//! removed as well.

use std::sync::LazyLock;

use regex::Regex;

/// Internal tag names whose blocks are never shown to the user.
pub const INTERNAL_TAGS: &[&str] = &[
    "thought",
    "thinking",
    "scratchpad",
    "reasoning",
    "reflection",
    "internal",
];

/// Default character budget for non-verbose tool output.
pub const DEFAULT_TOOL_OUTPUT_CHARS: usize = 2000;

/// Strip internal-only markup from assistant text.
///
/// Returns `None` when nothing visible remains.
#[must_use]
pub fn sanitize_assistant_text(text: &str) -> Option<String> {
    let stripped = strip_internal_blocks(text);

    let mut visible = String::with_capacity(stripped.len());
    let mut blank_run = 0usize;
    for line in stripped.lines() {
        if is_protocol_marker(line) {
            continue;
        }
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        visible.push_str(line.trim_end());
        visible.push('\n');
    }

    let visible = visible.trim();
    if visible.is_empty() {
        None
    } else {
        Some(visible.to_owned())
    }
}

/// Whether `line` is an internal protocol marker such as `[[TASK_COMPLETE]]`.
#[must_use]
pub fn is_protocol_marker(line: &str) -> bool {
    let trimmed = line.trim();
    let Some(inner) = trimmed
        .strip_prefix("[[")
        .and_then(|rest| rest.strip_suffix("]]"))
    else {
        return false;
    };
    !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '_' | ':' | '-'))
}

/// Remove internal tag blocks. See the module docs for the rules.
fn strip_internal_blocks(text: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut pos = 0usize;

    while let Some(offset) = lower[pos..].find('<') {
        let start = pos + offset;
        out.push_str(&text[pos..start]);

        match classify_tag(&lower[start..]) {
            TagMatch::Open { name, len } => {
                let body_start = start + len;
                let close = format!("</{name}>");
                match lower[body_start..].find(&close) {
                    Some(close_offset) => pos = body_start + close_offset + close.len(),
                    // Unterminated: the rest is reasoning still in flight.
                    None => return out,
                }
            }
            TagMatch::Unfinished => return out,
            TagMatch::Close { len } => pos = start + len,
            TagMatch::None => {
                out.push('<');
                pos = start + 1;
            }
        }
    }

    out.push_str(&text[pos..]);
    out
}

enum TagMatch {
    /// `<name>` or `<name attr…>`; `len` covers the whole tag.
    Open { name: &'static str, len: usize },
    /// `<name` running to the end of the text with no `>`.
    Unfinished,
    /// `</name>`.
    Close { len: usize },
    /// Not an internal tag.
    None,
}

fn classify_tag(lower: &str) -> TagMatch {
    let (closing, rest) = match lower.strip_prefix("</") {
        Some(rest) => (true, rest),
        None => (false, &lower[1..]),
    };

    for &name in INTERNAL_TAGS {
        let Some(after_name) = rest.strip_prefix(name) else {
            continue;
        };
        let prefix_len = lower.len() - after_name.len();

        if closing {
            if after_name.starts_with('>') {
                return TagMatch::Close {
                    len: prefix_len + 1,
                };
            }
            continue;
        }

        match after_name.chars().next() {
            Some('>') => {
                return TagMatch::Open {
                    name,
                    len: prefix_len + 1,
                }
            }
            Some(c) if c.is_whitespace() => {
                return after_name.find('>').map_or(TagMatch::Unfinished, |gt| {
                    TagMatch::Open {
                        name,
                        len: prefix_len + gt + 1,
                    }
                });
            }
            None => return TagMatch::Unfinished,
            Some(_) => {}
        }
    }

    TagMatch::None
}

// ── Tool output ───────────────────────────────────────────────────────────────

static ANSI_ESCAPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").ok());

static REFERENCE_ANNOTATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[ \t]*\[(?:ref|cursor|nth|level)=[^\]\n]*\]").ok());

static STATE_ANNOTATION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"[ \t]*\[(?:active|focused|checked|disabled|selected|expanded|pressed)\]").ok()
});

static INNER_SPACE_RUN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\S)[ \t]{2,}").ok());

static TRAILING_SPACE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").ok());

static BLANK_LINE_RUN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n{3,}").ok());

fn replace(re: &LazyLock<Option<Regex>>, text: &str, with: &str) -> String {
    match re.as_ref() {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_owned(),
    }
}

/// Strip structural annotations from tool output and collapse whitespace.
///
/// Removes ANSI escapes, element-reference and cursor annotations
/// (`[ref=e12]`, `[cursor=pointer]`) and bare state flags (`[active]`).
/// Unless `verbose`, output longer than [`DEFAULT_TOOL_OUTPUT_CHARS`]
/// characters is truncated.
#[must_use]
pub fn sanitize_tool_output(text: &str, verbose: bool) -> String {
    sanitize_tool_output_with_limit(text, verbose, DEFAULT_TOOL_OUTPUT_CHARS)
}

/// [`sanitize_tool_output`] with an explicit character budget.
#[must_use]
pub fn sanitize_tool_output_with_limit(text: &str, verbose: bool, max_chars: usize) -> String {
    let text = text.replace("\r\n", "\n");
    let text = replace(&ANSI_ESCAPE, &text, "");
    let text = replace(&REFERENCE_ANNOTATION, &text, "");
    let text = replace(&STATE_ANNOTATION, &text, "");
    let text = replace(&INNER_SPACE_RUN, &text, "$1 ");
    let text = replace(&TRAILING_SPACE, &text, "\n");
    let text = replace(&BLANK_LINE_RUN, &text, "\n\n");
    let text = text.trim();

    if verbose {
        return text.to_owned();
    }
    truncate_chars(text, max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}\n… ({} more characters)", kept.trim_end(), total - max_chars)
}
