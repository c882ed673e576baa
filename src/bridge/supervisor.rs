//! Worker process supervision.
//!
//! The supervisor owns the worker's stdin and the background tasks attached
//! to its other streams:
//!
//! - stdout reader: protocol messages, handed to the engine
//! - stderr reader: error text, handed to the classifier
//! - sweeper: fails batch streams past their deadline
//! - exit watcher: fails everything pending once the process is gone
//!
//! Dropping the supervisor cancels all four tasks. A spawned child is killed
//! when the exit watcher drops it.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::actor::{StreamKind, TaskHandle, spawn_reader_task, spawn_sweeper_task};
use super::engine::Engine;
use super::protocol::{Command, encode};
use crate::config::WorkerSettings;
use crate::error::{BridgeError, BridgeResult};

const TARGET: &str = "followee_bridge::supervisor";

/// How long the exit watcher waits for stdout to drain after the process
/// exits. Replies written just before exit still resolve their requests.
const STDOUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Resolves to the worker's exit code once it has exited.
pub(crate) type ExitFuture = Pin<Box<dyn Future<Output = Option<i32>> + Send>>;

type WorkerStdin = Box<dyn AsyncWrite + Send + Unpin>;

pub(crate) struct Supervisor {
    /// Serializes writes so each command line reaches the worker whole.
    stdin: Mutex<WorkerStdin>,
    engine: Arc<Engine>,
    _tasks: Vec<TaskHandle>,
}

impl Supervisor {
    /// Spawn the worker process and attach to its streams.
    pub(crate) fn spawn(
        worker: &WorkerSettings,
        engine: Arc<Engine>,
        sweep_period: Duration,
    ) -> BridgeResult<Self> {
        let args = worker.resolved_args();
        let mut child = tokio::process::Command::new(&worker.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::spawn(&worker.program, e))?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        info!(
            target: TARGET,
            "Spawned worker {} {:?} (pid {:?})",
            worker.program,
            args,
            child.id()
        );

        let exit: ExitFuture = Box::pin(async move {
            match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(target: TARGET, "Failed to wait for worker: {}", e);
                    None
                }
            }
        });

        Ok(Self::attach(engine, stdin, stdout, stderr, exit, sweep_period))
    }

    /// Attach to an already running worker's streams.
    pub(crate) fn attach<W, R, E>(
        engine: Arc<Engine>,
        stdin: W,
        stdout: R,
        stderr: E,
        exit: ExitFuture,
        sweep_period: Duration,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
        E: AsyncRead + Send + Unpin + 'static,
    {
        let stdout_closed = CancellationToken::new();
        let tasks = vec![
            spawn_reader_task(
                stdout,
                StreamKind::Stdout,
                engine.clone(),
                stdout_closed.clone(),
            ),
            spawn_reader_task(
                stderr,
                StreamKind::Stderr,
                engine.clone(),
                CancellationToken::new(),
            ),
            spawn_sweeper_task(engine.clone(), sweep_period),
            spawn_exit_watcher(exit, stdout_closed, engine.clone()),
        ];

        Self {
            stdin: Mutex::new(Box::new(stdin)),
            engine,
            _tasks: tasks,
        }
    }

    /// Write a registered command. Refused unless the worker is ready.
    pub(crate) async fn send(&self, command: &Command) -> BridgeResult<()> {
        let line = encode(command)?;
        let mut stdin = self.stdin.lock().await;
        // Checked under the stdin lock so nothing follows a shutdown command.
        self.engine.ensure_ready()?;
        write_line(&mut stdin, &line).await?;
        debug!(
            target: TARGET,
            "Sent {} ({})",
            command.kind().name(),
            command.request_id()
        );
        Ok(())
    }

    /// Write the shutdown command. Only called once the engine is closing.
    pub(crate) async fn send_shutdown(&self, command: &Command) -> BridgeResult<()> {
        let line = encode(command)?;
        let mut stdin = self.stdin.lock().await;
        write_line(&mut stdin, &line).await?;
        info!(target: TARGET, "Sent shutdown to worker");
        Ok(())
    }
}

async fn write_line(stdin: &mut WorkerStdin, line: &[u8]) -> BridgeResult<()> {
    stdin.write_all(line).await?;
    stdin.flush().await?;
    Ok(())
}

fn missing_pipe(stream: &str) -> BridgeError {
    std::io::Error::other(format!("worker {} was not captured", stream)).into()
}

fn spawn_exit_watcher(
    exit: ExitFuture,
    stdout_closed: CancellationToken,
    engine: Arc<Engine>,
) -> TaskHandle {
    let cancel_token = CancellationToken::new();
    let token_clone = cancel_token.clone();

    let join_handle = tokio::spawn(async move {
        let code = tokio::select! {
            _ = token_clone.cancelled() => return,
            code = exit => code,
        };

        if tokio::time::timeout(STDOUT_DRAIN_GRACE, stdout_closed.cancelled())
            .await
            .is_err()
        {
            debug!(target: TARGET, "Worker stdout still open after exit");
        }
        engine.terminate(code);
    });

    TaskHandle::new(join_handle, cancel_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::engine::test_engine;
    use crate::bridge::protocol::{CommandKind, RequestId};
    use crate::bridge::worker_state::WorkerState;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::oneshot;

    struct Wiring {
        supervisor: Supervisor,
        engine: Arc<Engine>,
        commands: tokio::io::Lines<BufReader<tokio::io::DuplexStream>>,
        exit_tx: oneshot::Sender<Option<i32>>,
        _stdout: tokio::io::DuplexStream,
        _stderr: tokio::io::DuplexStream,
    }

    fn wire() -> Wiring {
        let engine = Arc::new(test_engine());
        let (stdin, worker_stdin) = tokio::io::duplex(1024);
        let (worker_stdout, stdout) = tokio::io::duplex(1024);
        let (worker_stderr, stderr) = tokio::io::duplex(1024);
        let (exit_tx, exit_rx) = oneshot::channel();
        let exit: ExitFuture = Box::pin(async move { exit_rx.await.ok().flatten() });

        let supervisor = Supervisor::attach(
            engine.clone(),
            stdin,
            stdout,
            stderr,
            exit,
            Duration::from_secs(60),
        );
        Wiring {
            supervisor,
            engine,
            commands: BufReader::new(worker_stdin).lines(),
            exit_tx,
            _stdout: worker_stdout,
            _stderr: worker_stderr,
        }
    }

    #[tokio::test]
    async fn send_refuses_before_ready() {
        let mut wiring = wire();
        let command = Command::new(CommandKind::Logout {});

        let result = wiring.supervisor.send(&command).await;

        assert!(matches!(result, Err(BridgeError::NotReady)));
        drop(wiring.supervisor);
        assert!(wiring.commands.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn send_writes_one_line_per_command() {
        let mut wiring = wire();
        wiring
            .engine
            .handle_stdout_line(r#"{"status": "ready", "message": ""}"#);
        let command = Command::with_id(
            CommandKind::Fetch {
                target: "alice".to_string(),
            },
            RequestId::from("f1"),
        );

        wiring.supervisor.send(&command).await.unwrap();

        let line = wiring.commands.next_line().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["command"], "fetch");
        assert_eq!(value["request_id"], "f1");
        assert_eq!(value["target"], "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn exit_terminates_engine() {
        let wiring = wire();
        wiring
            .engine
            .handle_stdout_line(r#"{"status": "ready", "message": ""}"#);
        let rx = wiring
            .engine
            .register_id(RequestId::from("r1"), "logout")
            .unwrap();
        let mut state = wiring.engine.subscribe_state();

        wiring.exit_tx.send(Some(1)).unwrap();

        assert!(matches!(
            rx.await.unwrap(),
            Err(BridgeError::ProcessTerminated { code: Some(1) })
        ));
        state
            .wait_for(|s| *s == WorkerState::Terminated)
            .await
            .unwrap();
    }
}
