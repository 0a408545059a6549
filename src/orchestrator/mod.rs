//! Task orchestration: scheduling, supervision, and completion enforcement.
//!
//! - `task_manager`: the caller-facing [`TaskManager`](task_manager::TaskManager).
//! - `queue`: FIFO overflow queue.
//! - `supervisor`: per-task loop consuming adapter events.
//! - `completion`: the completion enforcement state machine.
//! - `callbacks`: the caller's [`TaskCallbacks`](callbacks::TaskCallbacks).

pub mod callbacks;
pub mod completion;
pub mod queue;
mod supervisor;
pub mod task_manager;
