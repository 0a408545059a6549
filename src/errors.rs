//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Agent output stream framing or decoding failure.
    Stream(String),
    /// Agent subprocess spawn, signal, or wait failure.
    Process(String),
    /// A task with the same identifier is already active or queued.
    DuplicateTask(String),
    /// The overflow queue is at its configured maximum.
    QueueFull(String),
    /// The task is queued, finished, or unknown, so it cannot receive input.
    TaskNotActive(String),
    /// The agent executable could not be located.
    CliNotFound(String),
    /// The adapter has no live subprocess (never started or already disposed).
    NoActiveProcess(String),
    /// The task manager has been disposed.
    Disposed(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Stream(msg) => write!(f, "stream: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::DuplicateTask(msg) => write!(f, "duplicate task: {msg}"),
            Self::QueueFull(msg) => write!(f, "queue full: {msg}"),
            Self::TaskNotActive(msg) => write!(f, "task not active: {msg}"),
            Self::CliNotFound(msg) => write!(f, "cli not found: {msg}"),
            Self::NoActiveProcess(msg) => write!(f, "no active process: {msg}"),
            Self::Disposed(msg) => write!(f, "disposed: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether this error was raised at admission time (`start_task`) without
    /// mutating any scheduler state.
    #[must_use]
    pub fn is_admission(&self) -> bool {
        matches!(self, Self::DuplicateTask(_) | Self::QueueFull(_))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Stream(format!("malformed json: {err}"))
    }
}
