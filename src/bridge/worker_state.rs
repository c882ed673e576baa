//! Worker lifecycle state machine.

use std::fmt;

/// State of the worker process as seen by the bridge.
///
/// - Starting: spawned, no `ready` status seen yet
/// - Ready: `ready` status received, commands may be written
/// - Closing: `shutdown` was sent, waiting for the process to exit
/// - Terminated: process exited (terminal state, no restart)
///
/// Transitions:
/// - Starting -> Ready (first status message with `status == "ready"`)
/// - Ready -> Closing (on `Bridge::shutdown`)
/// - any -> Terminated (on process exit, any exit code)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Worker spawned, awaiting the ready status
    Starting,
    /// Worker accepts commands
    Ready,
    /// Shutdown command sent
    Closing,
    /// Worker exited (terminal state)
    Terminated,
}

impl WorkerState {
    /// Whether commands may be written in this state.
    pub fn accepts_commands(self) -> bool {
        matches!(self, WorkerState::Ready)
    }

    /// Whether `next` is a legal transition from this state.
    pub(crate) fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Starting, Ready)
                | (Ready, Closing)
                | (Starting, Terminated)
                | (Ready, Terminated)
                | (Closing, Terminated)
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::Closing => "closing",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
