//! Periodic sweep of batch streams that never completed.
//!
//! A fetch whose chunks stop arriving before `total_batches` is reached has
//! no other way to finish: the sweeper fails it with a timeout once its
//! accumulator is older than the configured deadline.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::TaskHandle;
use crate::bridge::engine::Engine;

/// Spawn the sweeper, ticking every `period`.
///
/// The first sweep runs one full period after spawning.
pub(crate) fn spawn_sweeper_task(engine: Arc<Engine>, period: Duration) -> TaskHandle {
    let cancel_token = CancellationToken::new();
    let token_clone = cancel_token.clone();

    let join_handle = tokio::spawn(sweeper_loop(engine, period, token_clone));

    TaskHandle::new(join_handle, cancel_token)
}

async fn sweeper_loop(engine: Arc<Engine>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: "followee_bridge::sweeper", "Sweeper cancelled, shutting down");
                break;
            }
            _ = interval.tick() => {
                let swept = engine.sweep_expired(Instant::now());
                if swept > 0 {
                    debug!(
                        target: "followee_bridge::sweeper",
                        "Swept {} stale batch stream(s)",
                        swept
                    );
                }
            }
        }
    }
}
