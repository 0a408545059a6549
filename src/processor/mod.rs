//! Message processing between the stream parser and the caller.
//!
//! Pure functions decide what of the agent's output is user-visible and
//! clean it up; [`MessageBatcher`](batcher::MessageBatcher) coalesces bursts
//! of visible messages into batches.

pub mod batcher;
pub mod message;
pub mod sanitize;
pub mod tools;
