//! Tool identifier classification and display labels.

/// Tool the agent must call to declare a task's outcome.
pub const COMPLETION_TOOL: &str = "complete_task";

/// Tool the agent uses to publish its todo list.
pub const TODO_TOOL: &str = "todowrite";

/// Internal tools whose calls and results are never surfaced to the user.
pub const HIDDEN_TOOLS: &[&str] = &[
    "discard",
    "extract",
    "context_info",
    "prune",
    COMPLETION_TOOL,
    "report_thought",
];

/// Human-readable labels for known tools.
const DISPLAY_NAMES: &[(&str, &str)] = &[
    ("bash", "Run command"),
    ("read", "Read file"),
    ("write", "Write file"),
    ("edit", "Edit file"),
    ("glob", "Find files"),
    ("grep", "Search files"),
    ("list", "List files"),
    ("webfetch", "Fetch page"),
    ("websearch", "Search web"),
    (TODO_TOOL, "Update todos"),
    ("todoread", "Read todos"),
    ("task", "Delegate task"),
    ("browser_navigate", "Navigate"),
    ("browser_click", "Click"),
    ("browser_type", "Type"),
    ("browser_snapshot", "Read page"),
    ("browser_screenshot", "Screenshot"),
    ("browser_scroll", "Scroll"),
    ("browser_evaluate", "Run script"),
    ("browser_tabs", "Switch tab"),
    ("browser_wait", "Wait"),
    ("request_file_permission", "Request permission"),
    ("ask_user_question", "Ask question"),
];

/// Resolve a possibly server-prefixed tool id to its bare tool name.
///
/// `mcp__server__tool` resolves to `tool`. `server_browser_click` resolves to
/// `browser_click` when that suffix is a known multi-word tool; single-word
/// suffixes are not matched so `foo_task` is not mistaken for `task`.
#[must_use]
pub fn normalize_tool_id(tool_id: &str) -> &str {
    if let Some((_, last)) = tool_id.rsplit_once("__") {
        if !last.is_empty() {
            return last;
        }
    }

    if is_known(tool_id) {
        return tool_id;
    }

    tool_id
        .match_indices('_')
        .map(|(idx, _)| &tool_id[idx + 1..])
        .find(|suffix| suffix.contains('_') && is_known(suffix))
        .unwrap_or(tool_id)
}

fn is_known(name: &str) -> bool {
    HIDDEN_TOOLS.contains(&name) || DISPLAY_NAMES.iter().any(|&(id, _)| id == name)
}

/// Whether `tool_id` names an internal tool.
#[must_use]
pub fn is_hidden_tool(tool_id: &str) -> bool {
    HIDDEN_TOOLS.contains(&normalize_tool_id(tool_id))
}

/// Whether `tool_id` names the completion tool.
#[must_use]
pub fn is_completion_tool(tool_id: &str) -> bool {
    normalize_tool_id(tool_id) == COMPLETION_TOOL
}

/// Whether `tool_id` names the todo tool.
#[must_use]
pub fn is_todo_tool(tool_id: &str) -> bool {
    normalize_tool_id(tool_id) == TODO_TOOL
}

/// User-facing label for a tool.
///
/// Returns `None` for hidden tools, a fixed label for known tools, and the
/// raw identifier for anything else.
#[must_use]
pub fn get_tool_display_name(tool_id: &str) -> Option<&str> {
    let name = normalize_tool_id(tool_id);
    if HIDDEN_TOOLS.contains(&name) {
        return None;
    }
    let label = DISPLAY_NAMES
        .iter()
        .find(|&&(id, _)| id == name)
        .map_or(tool_id, |&(_, label)| label);
    Some(label)
}
