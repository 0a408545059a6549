//! Agent output stream handling.
//!
//! The agent CLI writes newline-delimited JSON events on stdout and reads
//! free-text operator messages on stdin. This module owns both directions:
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based line framing
//!   with a per-line size cap.
//! - `event`: the closed [`StreamEvent`](event::StreamEvent) sum type.
//! - `parser`: the incremental [`StreamParser`](parser::StreamParser) that
//!   turns arbitrary byte chunks into events.
//! - `writer`: the stdin writer task.

pub mod codec;
pub mod event;
pub mod parser;
pub mod writer;
