//! Error handling types for followee-bridge
//!
//! This module provides the failure taxonomy every pending request can be
//! resolved with, plus the plumbing errors of spawning and talking to the worker.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use thiserror::Error;

use crate::bridge::RequestId;

/// Comprehensive error type for bridge operations.
///
/// `Clone` so a single failure (termination, shutdown) can be delivered to
/// every waiter. I/O sources are shared behind `Arc` for the same reason.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Command issued before the worker reported ready (or after shutdown began)
    #[error("worker is not ready")]
    NotReady,

    /// A worker output line could not be decoded
    #[error("failed to parse worker line {line:?}: {message}")]
    Parse { line: String, message: String },

    /// A batch stream did not complete within the deadline
    #[error("request {request_id} timed out after {elapsed:?} while collecting batch data")]
    Timeout {
        request_id: RequestId,
        elapsed: Duration,
    },

    /// The worker process exited
    #[error("worker terminated unexpectedly (exit code: {code:?})")]
    ProcessTerminated { code: Option<i32> },

    /// Best-effort match on the worker's error stream
    #[error("{message}")]
    Classified { message: String },

    /// A request with this ID is already pending
    #[error("request {request_id} is already pending")]
    DuplicateRequest { request_id: RequestId },

    /// Shutdown was requested while the request was still pending
    #[error("worker is shutting down")]
    ShutdownInFlight,

    /// The worker answered with a non-true `success`
    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// The worker answered with a reply shape the command cannot use
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    /// Command could not be serialized
    #[error("failed to encode command: {0}")]
    Encode(String),

    /// Worker process could not be started
    #[error("failed to spawn worker {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// IO error on the worker's standard streams
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// The resolver was dropped without a resolution
    #[error("bridge disconnected before the request was resolved")]
    Disconnected,

    /// Configuration error
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Encode(err.to_string())
    }
}

impl BridgeError {
    /// Create a command failure from the worker's error text
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Create a spawn error for the given program
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        BridgeError::Spawn {
            program: program.into(),
            source: Arc::new(source),
        }
    }
}

/// Helper trait to recover guards from poisoned locks.
pub trait LockResultExt<T> {
    /// Recover the guard from a poisoned lock, logging which operation hit it.
    ///
    /// The tables behind these locks are only mutated by short, non-panicking
    /// sections, so the inner state is still consistent after a poison.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "followee_bridge::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}
