//! Domain models for tasks, progress markers, and agent todo lists.

pub mod progress;
pub mod task;
pub mod todo;
