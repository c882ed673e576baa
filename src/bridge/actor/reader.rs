//! Reader tasks for the worker's stdout and stderr.
//!
//! Each task:
//! - Runs in a spawned tokio task
//! - Reads newline-terminated lines, decoding invalid UTF-8 lossily
//! - Hands each line to the engine (protocol dispatch or error classification)
//! - Shuts down on EOF, read error, or cancellation

use std::sync::Arc;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;

use super::TaskHandle;
use crate::bridge::engine::Engine;

/// Which worker stream a reader drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    /// Protocol messages
    Stdout,
    /// Unstructured error text
    Stderr,
}

impl StreamKind {
    fn target(self) -> &'static str {
        match self {
            StreamKind::Stdout => "followee_bridge::reader",
            StreamKind::Stderr => "followee_bridge::stderr",
        }
    }
}

/// Spawn a reader task for one worker stream.
///
/// # Arguments
/// * `stream` - The worker's stdout or stderr
/// * `kind` - Which stream it is; decides how lines are handled
/// * `engine` - Engine receiving the lines
/// * `closed` - Cancelled when the reader stops, so the exit watcher can wait
///   for buffered output to be drained before failing pending requests
pub(crate) fn spawn_reader_task<R>(
    stream: R,
    kind: StreamKind,
    engine: Arc<Engine>,
    closed: CancellationToken,
) -> TaskHandle
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let cancel_token = CancellationToken::new();
    let token_clone = cancel_token.clone();

    let join_handle = tokio::spawn(async move {
        let _closed = closed.drop_guard();
        reader_loop(stream, kind, engine, token_clone).await;
    });

    TaskHandle::new(join_handle, cancel_token)
}

/// The main reader loop - reads lines and hands them to the engine.
async fn reader_loop<R>(stream: R, kind: StreamKind, engine: Arc<Engine>, cancel: CancellationToken)
where
    R: AsyncRead + Send + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: kind.target(), "Reader task cancelled, shutting down");
                break;
            }

            result = reader.read_until(b'\n', &mut buffer) => {
                match result {
                    Ok(0) => {
                        debug!(target: kind.target(), "Worker closed {:?}", kind);
                        break;
                    }
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buffer);
                        handle_line(&engine, kind, line.trim_end_matches(['\r', '\n']));
                    }
                    Err(e) => {
                        warn!(target: kind.target(), "Reader error on {:?}: {}", kind, e);
                        break;
                    }
                }
            }
        }
    }
}

fn handle_line(engine: &Engine, kind: StreamKind, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    match kind {
        StreamKind::Stdout => engine.handle_stdout_line(line),
        StreamKind::Stderr => engine.handle_stderr_line(line),
    }
}
