#![forbid(unsafe_code)]

//! Task orchestration and output streaming for external coding-agent CLIs.

pub mod adapter;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod stream;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use orchestrator::callbacks::TaskCallbacks;
pub use orchestrator::task_manager::{TaskManager, TaskManagerOptions};
