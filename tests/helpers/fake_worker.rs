//! In-process stand-in for the fetcher worker.
//!
//! The bridge is attached to in-memory pipes; the test plays the worker by
//! reading the commands the bridge writes and scripting replies.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use followee_bridge::{Bridge, BridgeSettings, ErrorClassifier};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::oneshot;

type ExitFuture = Pin<Box<dyn Future<Output = Option<i32>> + Send>>;

pub struct FakeWorker {
    commands: Lines<BufReader<DuplexStream>>,
    stdout: DuplexStream,
    stderr: DuplexStream,
    exit: oneshot::Sender<Option<i32>>,
}

/// Attach a bridge to a fresh fake worker.
pub fn connect(settings: &BridgeSettings) -> (Bridge, FakeWorker) {
    connect_with(|stdin, stdout, stderr, exit| {
        Bridge::attach(settings, stdin, stdout, stderr, exit)
    })
}

/// Attach with `classifier` judging the worker's stderr.
pub fn connect_with_classifier(
    settings: &BridgeSettings,
    classifier: Box<dyn ErrorClassifier>,
) -> (Bridge, FakeWorker) {
    connect_with(|stdin, stdout, stderr, exit| {
        Bridge::attach_with_classifier(settings, classifier, stdin, stdout, stderr, exit)
    })
}

fn connect_with<A>(attach: A) -> (Bridge, FakeWorker)
where
    A: FnOnce(DuplexStream, DuplexStream, DuplexStream, ExitFuture) -> Bridge,
{
    let (bridge_stdin, worker_stdin) = tokio::io::duplex(64 * 1024);
    let (worker_stdout, bridge_stdout) = tokio::io::duplex(64 * 1024);
    let (worker_stderr, bridge_stderr) = tokio::io::duplex(64 * 1024);
    let (exit_tx, exit_rx) = oneshot::channel();

    let bridge = attach(
        bridge_stdin,
        bridge_stdout,
        bridge_stderr,
        Box::pin(async move { exit_rx.await.ok().flatten() }),
    );

    let worker = FakeWorker {
        commands: BufReader::new(worker_stdin).lines(),
        stdout: worker_stdout,
        stderr: worker_stderr,
        exit: exit_tx,
    };
    (bridge, worker)
}

/// Attach with default settings and complete the ready handshake.
pub async fn connect_ready() -> (Bridge, FakeWorker) {
    let (bridge, mut worker) = connect(&BridgeSettings::default());
    worker.ready().await;
    bridge.wait_until_ready().await.expect("worker should be ready");
    (bridge, worker)
}

impl FakeWorker {
    pub async fn ready(&mut self) {
        self.send(json!({"status": "ready", "message": "Fetcher ready"}))
            .await;
    }

    /// Write one JSON message to the worker's stdout.
    pub async fn send(&mut self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.stdout.write_all(line.as_bytes()).await.unwrap();
        self.stdout.write_all(b"\n").await.unwrap();
        self.stdout.flush().await.unwrap();
    }

    /// Write one line to the worker's stderr.
    pub async fn stderr(&mut self, line: &str) {
        self.stderr.write_all(line.as_bytes()).await.unwrap();
        self.stderr.write_all(b"\n").await.unwrap();
        self.stderr.flush().await.unwrap();
    }

    /// Next command the bridge wrote. Panics if stdin was closed.
    pub async fn next_command(&mut self) -> Value {
        let line = self
            .commands
            .next_line()
            .await
            .unwrap()
            .expect("bridge closed worker stdin");
        serde_json::from_str(&line).expect("bridge wrote invalid JSON")
    }

    /// Next command, or `None` if nothing arrives within `within`.
    pub async fn try_next_command(&mut self, within: Duration) -> Option<Value> {
        match tokio::time::timeout(within, self.commands.next_line()).await {
            Ok(Ok(Some(line))) => Some(serde_json::from_str(&line).unwrap()),
            _ => None,
        }
    }

    /// Simulate the process exiting with `code`.
    ///
    /// Output streams close first, as they do when a real process dies.
    pub fn exit(self, code: Option<i32>) {
        let FakeWorker {
            stdout,
            stderr,
            exit,
            ..
        } = self;
        drop(stdout);
        drop(stderr);
        let _ = exit.send(code);
    }
}

/// Request ID of a command the bridge wrote.
pub fn request_id(command: &Value) -> String {
    command["request_id"]
        .as_str()
        .expect("command carries a request_id")
        .to_string()
}

/// One `fetch_batch` chunk with `count` generated followees numbered from `first`.
pub fn batch(request_id: &str, target: &str, first: usize, count: usize, total: u32) -> Value {
    let data: Vec<Value> = (first..first + count)
        .map(|n| json!({"username": format!("user{}", n), "full_name": format!("User {}", n)}))
        .collect();
    json!({
        "command": "fetch_batch",
        "request_id": request_id,
        "success": true,
        "target": target,
        "data": data,
        "total_batches": total,
    })
}
