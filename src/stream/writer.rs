//! Agent stdin writer task.
//!
//! Receives operator messages from a tokio [`mpsc`] channel and writes each
//! as a newline-terminated line to the agent's stdin, framed by
//! [`NdjsonCodec`]. Continuation prompts
//! injected by the completion enforcer travel the same path, so operator
//! input and injected prompts are written in the order they were sent.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream::codec::NdjsonCodec;
use crate::{AppError, Result};

/// Stdin writer task. Writes each received message as one line.
///
/// A trailing `\n` is appended unless the message already ends with one.
/// The writer flushes after every message so the agent sees input promptly.
///
/// The task exits cleanly when:
/// - `cancel` is triggered, or
/// - `msg_rx` is closed (all senders dropped).
///
/// # Errors
///
/// Returns [`AppError::Process`]`("write failed: …")` if writing to `stdin`
/// fails (e.g. the agent process has exited).
pub async fn run_writer<W>(
    task_id: String,
    stdin: W,
    mut msg_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stdin = stdin;
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::new();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(task_id, "stdin writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(text) = msg else {
                    debug!(task_id, "stdin writer: message channel closed, stopping");
                    break;
                };

                let mut line = text;
                if line.ends_with('\n') {
                    line.pop();
                }
                buf.clear();
                codec.encode(line, &mut buf)?;

                if let Err(e) = write_line(&mut stdin, &buf).await {
                    warn!(task_id, error = %e, "stdin writer: write to stdin failed");
                    return Err(AppError::Process(format!("write failed: {e}")));
                }
            }
        }
    }

    Ok(())
}

async fn write_line<W>(stdin: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    stdin.write_all(bytes).await?;
    stdin.flush().await
}
