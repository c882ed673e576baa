//! Single owner of the correlation state.
//!
//! `Engine` holds the pending-request table, the batch collector and the
//! worker state. Reader tasks, the sweeper, the exit watcher and callers all
//! go through it. The tables live behind one mutex; the worker state is
//! published through a `watch` channel but only written while that mutex is
//! held, so registration and termination cannot interleave.
//!
//! Nothing here awaits while holding the lock.

use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use super::actor::{BatchCollector, ChunkProgress, PendingRequests, Resolution};
use super::classifier::{AttributionPolicy, ErrorClassifier};
use super::protocol::{
    BatchChunk, BatchMetadata, Command, InboundMessage, Reply, RequestId, SingleResponse,
    StatusMessage, decode_line,
};
use super::worker_state::WorkerState;
use crate::error::{BridgeError, BridgeResult, LockResultExt};

const TARGET: &str = "followee_bridge::engine";

struct Tables {
    pending: PendingRequests,
    batches: BatchCollector,
}

pub(crate) struct Engine {
    tables: Mutex<Tables>,
    state: watch::Sender<WorkerState>,
    classifier: Box<dyn ErrorClassifier>,
    policy: AttributionPolicy,
    batch_deadline: Duration,
}

impl Engine {
    pub(crate) fn new(
        classifier: Box<dyn ErrorClassifier>,
        policy: AttributionPolicy,
        batch_deadline: Duration,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Starting);
        Self {
            tables: Mutex::new(Tables {
                pending: PendingRequests::new(),
                batches: BatchCollector::new(),
            }),
            state,
            classifier,
            policy,
            batch_deadline,
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.lock("pending_count").pending.len()
    }

    pub(crate) fn batch_count(&self) -> usize {
        self.lock("batch_count").batches.len()
    }

    fn lock(&self, context: &str) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().recover_poison(context)
    }

    /// Move to `next` if the transition is legal. Caller holds the tables lock.
    fn transition(&self, next: WorkerState) -> bool {
        let current = *self.state.borrow();
        if !current.can_transition_to(next) {
            return false;
        }
        self.state.send_replace(next);
        info!(target: TARGET, "Worker state {} -> {}", current, next);
        true
    }

    pub(crate) fn ensure_ready(&self) -> BridgeResult<()> {
        if self.state().accepts_commands() {
            Ok(())
        } else {
            Err(BridgeError::NotReady)
        }
    }

    /// Register `command` before it is written.
    ///
    /// Fails with `NotReady` unless the worker is ready.
    pub(crate) fn register(&self, command: &Command) -> BridgeResult<oneshot::Receiver<Resolution>> {
        let mut tables = self.lock("register");
        self.ensure_ready()?;
        tables
            .pending
            .register(command.request_id().clone(), command.kind().name())
            .ok_or_else(|| BridgeError::DuplicateRequest {
                request_id: command.request_id().clone(),
            })
    }

    /// Drop a registration whose command never reached the worker.
    ///
    /// Returns `false` if the request was already resolved meanwhile.
    pub(crate) fn forget(&self, id: &RequestId) -> bool {
        let mut tables = self.lock("forget");
        tables.batches.remove(id);
        tables.pending.remove(id)
    }

    /// Handle one line of worker stdout.
    pub(crate) fn handle_stdout_line(&self, line: &str) {
        match decode_line(line) {
            Ok(InboundMessage::Status(status)) => self.on_status(status),
            Ok(InboundMessage::Single(reply)) => self.on_single(reply),
            Ok(InboundMessage::BatchMetadata(metadata)) => self.on_metadata(metadata),
            Ok(InboundMessage::BatchChunk(chunk)) => self.on_chunk(chunk),
            Err(e) => warn!(target: TARGET, "Dropping worker output: {}", e),
        }
    }

    fn on_status(&self, status: StatusMessage) {
        if status.is_ready() {
            let _tables = self.lock("status");
            if !self.transition(WorkerState::Ready) {
                debug!(target: TARGET, "Ignoring ready status in state {}", self.state());
            }
            return;
        }

        if status.status.eq_ignore_ascii_case("error") {
            warn!(target: TARGET, "Worker status {}: {}", status.status, status.message);
        } else {
            info!(target: TARGET, "Worker status {}: {}", status.status, status.message);
        }
    }

    fn on_single(&self, reply: SingleResponse) {
        let id = reply.request_id.clone();
        let mut tables = self.lock("single_reply");
        if let Some(expected) = tables.pending.command_of(&id) {
            if reply.command != expected {
                debug!(
                    target: TARGET,
                    "Request {} ({}) answered with {} reply",
                    id,
                    expected,
                    reply.command
                );
            }
        }
        tables.batches.remove(&id);
        if !tables.pending.resolve(&id, Ok(Reply::Single(reply))) {
            debug!(target: TARGET, "No waiter for reply {}", id);
        }
    }

    fn on_metadata(&self, metadata: BatchMetadata) {
        let id = metadata.request_id.clone();
        let mut tables = self.lock("batch_metadata");
        if !tables.pending.contains(&id) {
            debug!(target: TARGET, "Ignoring fetch metadata for unknown request {}", id);
            return;
        }

        if !metadata.success {
            let message = metadata.error.as_deref().unwrap_or("fetch failed");
            tables.batches.remove(&id);
            tables
                .pending
                .resolve(&id, Err(BridgeError::command_failed("fetch", message)));
            return;
        }

        tables.batches.seed(&metadata, Instant::now());
    }

    fn on_chunk(&self, chunk: BatchChunk) {
        let id = chunk.request_id.clone();
        let mut tables = self.lock("batch_chunk");
        if !tables.pending.contains(&id) {
            debug!(target: TARGET, "Ignoring batch chunk for unknown request {}", id);
            return;
        }

        if !chunk.success {
            tables.batches.remove(&id);
            tables.pending.resolve(
                &id,
                Err(BridgeError::command_failed("fetch", "batch reported failure")),
            );
            return;
        }

        match tables.batches.push(chunk, Instant::now()) {
            ChunkProgress::Incomplete { received, declared } => {
                debug!(target: TARGET, "Request {}: batch {}/{}", id, received, declared);
            }
            ChunkProgress::Complete(result) => {
                debug!(
                    target: TARGET,
                    "Request {}: all batches received ({} items)",
                    id,
                    result.items.len()
                );
                tables.pending.resolve(&id, Ok(Reply::Batch(result)));
            }
        }
    }

    /// Handle one line of worker stderr.
    pub(crate) fn handle_stderr_line(&self, line: &str) {
        warn!(target: "followee_bridge::stderr", "{}", line);

        let Some(message) = self.classifier.classify(line) else {
            return;
        };

        let mut tables = self.lock("classify");
        let Some(id) = self.policy.select(&tables.pending) else {
            debug!(
                target: TARGET,
                "Classified error line not attributed ({} pending, policy {})",
                tables.pending.len(),
                self.policy
            );
            return;
        };

        info!(target: TARGET, "Attributing worker error to request {}: {}", id, message);
        tables.batches.remove(&id);
        tables
            .pending
            .resolve(&id, Err(BridgeError::Classified { message }));
    }

    /// Fail every batch stream older than the deadline. Returns how many.
    pub(crate) fn sweep_expired(&self, now: Instant) -> usize {
        let mut tables = self.lock("sweep");
        let expired = tables.batches.take_expired(now, self.batch_deadline);
        for (request_id, elapsed) in &expired {
            warn!(
                target: TARGET,
                "Request {} timed out after {:?} waiting for batches",
                request_id,
                elapsed
            );
            tables.pending.resolve(
                request_id,
                Err(BridgeError::Timeout {
                    request_id: request_id.clone(),
                    elapsed: *elapsed,
                }),
            );
        }
        expired.len()
    }

    /// The worker exited: fail everything still pending.
    pub(crate) fn terminate(&self, code: Option<i32>) {
        let mut tables = self.lock("terminate");
        if !self.transition(WorkerState::Terminated) {
            return;
        }
        let failed = tables
            .pending
            .reject_all(&BridgeError::ProcessTerminated { code });
        tables.batches.clear();
        warn!(
            target: TARGET,
            "Worker exited with code {:?}; failed {} pending request(s)",
            code,
            failed
        );
    }

    /// Shutdown was requested: stop accepting commands and fail the
    /// in-flight ones.
    ///
    /// Returns `false` if the worker was not ready.
    pub(crate) fn begin_shutdown(&self) -> bool {
        let mut tables = self.lock("shutdown");
        if !self.transition(WorkerState::Closing) {
            return false;
        }
        let failed = tables.pending.reject_all(&BridgeError::ShutdownInFlight);
        tables.batches.clear();
        if failed > 0 {
            info!(target: TARGET, "Shutdown failed {} in-flight request(s)", failed);
        }
        true
    }
}

#[cfg(test)]
pub(crate) fn test_engine() -> Engine {
    Engine::new(
        Box::new(super::classifier::PatternClassifier::default()),
        AttributionPolicy::LatestPending,
        Duration::from_secs(300),
    )
}

#[cfg(test)]
impl Engine {
    /// Register a fetch/logout-shaped request under a fixed ID.
    pub(crate) fn register_id(
        &self,
        id: RequestId,
        command: &'static str,
    ) -> BridgeResult<oneshot::Receiver<Resolution>> {
        use super::protocol::CommandKind;

        let kind = match command {
            "fetch" => CommandKind::Fetch {
                target: "alice".to_string(),
            },
            "login" => CommandKind::Login {
                username: "u".to_string(),
                password: "p".to_string(),
                code: None,
            },
            _ => CommandKind::Logout {},
        };
        self.register(&Command::with_id(kind, id))
    }
}
