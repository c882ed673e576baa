//! Command API over the worker bridge.
//!
//! `Bridge` is cheap to clone; clones share one worker. Each command call
//! registers its request before writing it, then waits on its own oneshot
//! receiver without holding any lock, so any number of commands may be in
//! flight at once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

use super::classifier::{ErrorClassifier, PatternClassifier};
use super::engine::Engine;
use super::protocol::{Ack, Command, CommandKind, FetchResult, LoginOutcome, Reply};
use super::supervisor::{ExitFuture, Supervisor};
use super::worker_state::WorkerState;
use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult};

const TARGET: &str = "followee_bridge::client";

/// Handle to one worker process.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    engine: Arc<Engine>,
    supervisor: Supervisor,
    ready_timeout: Duration,
}

fn configured_classifier(settings: &BridgeSettings) -> Box<dyn ErrorClassifier> {
    Box::new(PatternClassifier::new(
        &settings.classifier.patterns,
        settings.classifier.message.clone(),
    ))
}

fn engine_for(settings: &BridgeSettings, classifier: Box<dyn ErrorClassifier>) -> Arc<Engine> {
    Arc::new(Engine::new(
        classifier,
        settings.classifier.policy,
        settings.timeouts.batch_deadline(),
    ))
}

impl Bridge {
    /// Spawn the configured worker. Must be called inside a tokio runtime.
    ///
    /// The worker starts in `Starting`; commands are refused until it reports
    /// ready (see [`Bridge::wait_until_ready`]).
    pub fn spawn(settings: &BridgeSettings) -> BridgeResult<Self> {
        Self::spawn_with_classifier(settings, configured_classifier(settings))
    }

    /// Like [`Bridge::spawn`], with `classifier` in place of the configured
    /// stderr patterns. The attribution policy still comes from `settings`.
    pub fn spawn_with_classifier(
        settings: &BridgeSettings,
        classifier: Box<dyn ErrorClassifier>,
    ) -> BridgeResult<Self> {
        let engine = engine_for(settings, classifier);
        let supervisor = Supervisor::spawn(
            &settings.worker,
            engine.clone(),
            settings.timeouts.sweep_interval(),
        )?;
        Ok(Self::from_parts(engine, supervisor, settings))
    }

    /// Attach to a worker reachable through arbitrary streams.
    ///
    /// `exit` resolves to the worker's exit code once it is gone.
    pub fn attach<W, R, E, F>(
        settings: &BridgeSettings,
        stdin: W,
        stdout: R,
        stderr: E,
        exit: F,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
        E: AsyncRead + Send + Unpin + 'static,
        F: Future<Output = Option<i32>> + Send + 'static,
    {
        Self::attach_with_classifier(
            settings,
            configured_classifier(settings),
            stdin,
            stdout,
            stderr,
            exit,
        )
    }

    /// Like [`Bridge::attach`], with a caller-supplied stderr classifier.
    pub fn attach_with_classifier<W, R, E, F>(
        settings: &BridgeSettings,
        classifier: Box<dyn ErrorClassifier>,
        stdin: W,
        stdout: R,
        stderr: E,
        exit: F,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
        E: AsyncRead + Send + Unpin + 'static,
        F: Future<Output = Option<i32>> + Send + 'static,
    {
        let engine = engine_for(settings, classifier);
        let exit: ExitFuture = Box::pin(exit);
        let supervisor = Supervisor::attach(
            engine.clone(),
            stdin,
            stdout,
            stderr,
            exit,
            settings.timeouts.sweep_interval(),
        );
        Self::from_parts(engine, supervisor, settings)
    }

    fn from_parts(engine: Arc<Engine>, supervisor: Supervisor, settings: &BridgeSettings) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                engine,
                supervisor,
                ready_timeout: settings.timeouts.ready_timeout(),
            }),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.inner.engine.state()
    }

    /// Number of requests awaiting a resolution.
    pub fn pending_count(&self) -> usize {
        self.inner.engine.pending_count()
    }

    /// Number of batch streams being reassembled.
    pub fn batch_count(&self) -> usize {
        self.inner.engine.batch_count()
    }

    /// Wait for the worker's ready status, up to the configured timeout.
    ///
    /// Fails with `NotReady` on timeout, or if the worker left `Starting`
    /// without becoming ready.
    pub async fn wait_until_ready(&self) -> BridgeResult<()> {
        let mut state = self.inner.engine.subscribe_state();
        let waited = tokio::time::timeout(
            self.inner.ready_timeout,
            state.wait_for(|s| *s != WorkerState::Starting),
        )
        .await;

        match waited {
            Ok(Ok(reached)) if reached.accepts_commands() => Ok(()),
            Ok(Ok(_)) | Err(_) => Err(BridgeError::NotReady),
            Ok(Err(_)) => Err(BridgeError::Disconnected),
        }
    }

    /// Resolves once the worker process has exited.
    pub async fn terminated(&self) {
        let mut state = self.inner.engine.subscribe_state();
        let _ = state.wait_for(|s| *s == WorkerState::Terminated).await;
    }

    /// Log the worker in. A rejected login is `Ok` with `logged_in == false`.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        code: Option<&str>,
    ) -> BridgeResult<LoginOutcome> {
        self.request(CommandKind::Login {
            username: username.to_string(),
            password: password.to_string(),
            code: code.map(str::to_string),
        })
        .await?
        .into_login_outcome()
    }

    /// Fetch every followee of `target`, reassembled from its batches.
    pub async fn fetch(&self, target: &str) -> BridgeResult<FetchResult> {
        self.request(CommandKind::Fetch {
            target: target.to_string(),
        })
        .await?
        .into_fetch_result(target)
    }

    pub async fn logout(&self) -> BridgeResult<Ack> {
        self.request(CommandKind::Logout {}).await?.into_ack("logout")
    }

    /// Ask the worker to exit.
    ///
    /// Every in-flight request fails with `ShutdownInFlight` and later
    /// commands with `NotReady`. No reply is awaited. Calling it again while
    /// the worker is closing is a no-op.
    pub async fn shutdown(&self) -> BridgeResult<()> {
        let engine = &self.inner.engine;
        if !engine.begin_shutdown() {
            return match engine.state() {
                WorkerState::Closing => Ok(()),
                _ => Err(BridgeError::NotReady),
            };
        }

        let command = Command::new(CommandKind::Shutdown {});
        self.inner.supervisor.send_shutdown(&command).await
    }

    async fn request(&self, kind: CommandKind) -> BridgeResult<Reply> {
        let command = Command::new(kind);
        debug!(
            target: TARGET,
            "Request {}: {:?}",
            command.request_id(),
            command.kind()
        );

        let receiver = self.inner.engine.register(&command)?;

        if let Err(e) = self.inner.supervisor.send(&command).await {
            // Already resolved (termination, shutdown): report that instead.
            if self.inner.engine.forget(command.request_id()) {
                return Err(e);
            }
        }

        receiver.await.map_err(|_| BridgeError::Disconnected)?
    }
}
