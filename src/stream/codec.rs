//! NDJSON line codec for agent output streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so an unterminated or oversized line from a misbehaving agent
//! cannot grow the buffer without bound.
//!
//! After a [`MaxLineLengthExceeded`](LinesCodecError::MaxLineLengthExceeded)
//! error the inner codec discards input up to the next `\n`, so decoding can
//! resume on the following line.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default maximum line length accepted by the codec: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited line codec for agent streams.
///
/// # Decoder
///
/// Lines longer than the configured limit return
/// [`AppError::Stream`]`("line too long: …")`; lines that are not valid UTF-8
/// return [`AppError::Stream`]`("invalid utf-8 …")`. Both consume the offending
/// line. Other I/O errors map to [`AppError::Io`].
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`.
#[derive(Debug)]
pub struct NdjsonCodec {
    inner: LinesCodec,
    max_line_bytes: usize,
}

impl NdjsonCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }

    fn map_error(&self, e: LinesCodecError) -> AppError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => AppError::Stream(format!(
                "line too long: exceeded {} bytes",
                self.max_line_bytes
            )),
            LinesCodecError::Io(io_err) if io_err.kind() == std::io::ErrorKind::InvalidData => {
                AppError::Stream(format!("invalid utf-8 in line: {io_err}"))
            }
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds no complete line.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode(src).map_err(|e| self.map_error(e))
    }

    /// Decode the final, possibly unterminated, line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode_eof(src).map_err(|e| self.map_error(e))
    }
}

impl Encoder<String> for NdjsonCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated line into `dst`.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner.encode(item, dst).map_err(|e| self.map_error(e))
    }
}
