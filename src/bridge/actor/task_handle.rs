//! RAII handle for background bridge tasks.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a running background task.
///
/// Dropping the handle cancels the task's token; the task observes the
/// cancellation at its next `select!` and returns.
pub(crate) struct TaskHandle {
    /// Held so the task stays associated with its owner.
    _join_handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl TaskHandle {
    pub(crate) fn new(join_handle: JoinHandle<()>, cancel_token: CancellationToken) -> Self {
        Self {
            _join_handle: join_handle,
            cancel_token,
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
