//! Reassembly of fetch replies streamed in chunks.
//!
//! The worker splits one logical fetch result into several `fetch_batch`
//! messages sharing a request ID, each declaring `total_batches`. Chunks carry
//! no sequence number, so items are collected in arrival order. Reordering at
//! the transport level would reorder the result; nothing here can detect it.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::bridge::protocol::{
    BatchChunk, BatchMetadata, BatchResult, FETCH_BATCH, FETCH_RESPONSE, Followee, RequestId,
};

/// In-progress accumulation for one request.
#[derive(Debug)]
struct BatchAccumulator {
    command: String,
    success: bool,
    target: Option<String>,
    items: Vec<Followee>,
    declared_total: u32,
    received: u32,
    created_at: Instant,
    completed: bool,
}

impl BatchAccumulator {
    fn new(command: &str, success: bool, target: Option<String>, now: Instant) -> Self {
        Self {
            command: command.to_string(),
            success,
            target,
            items: Vec::new(),
            declared_total: 0,
            received: 0,
            created_at: now,
            completed: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.declared_total > 0 && self.received == self.declared_total
    }
}

/// Progress after a chunk was collected.
#[derive(Debug, PartialEq)]
pub(crate) enum ChunkProgress {
    /// More chunks are expected.
    Incomplete { received: u32, declared: u32 },
    /// All declared chunks arrived; the accumulator is gone.
    Complete(BatchResult),
}

/// Accumulators keyed by request ID.
#[derive(Debug, Default)]
pub(crate) struct BatchCollector {
    batches: HashMap<RequestId, BatchAccumulator>,
}

impl BatchCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Open an accumulator from a metadata message, unless one exists.
    ///
    /// Returns `true` if a new accumulator was created.
    pub(crate) fn seed(&mut self, metadata: &BatchMetadata, now: Instant) -> bool {
        if self.batches.contains_key(&metadata.request_id) {
            return false;
        }
        self.batches.insert(
            metadata.request_id.clone(),
            BatchAccumulator::new(
                FETCH_RESPONSE,
                metadata.success,
                metadata.target.clone(),
                now,
            ),
        );
        true
    }

    /// Collect one chunk, opening the accumulator if this is the first message
    /// seen for the request.
    ///
    /// `total_batches` is expected to be constant per request. If it changes
    /// mid-stream the latest value wins and a warning is logged.
    pub(crate) fn push(&mut self, chunk: BatchChunk, now: Instant) -> ChunkProgress {
        let BatchChunk {
            request_id,
            success,
            target,
            data,
            total_batches,
        } = chunk;

        let mut entry = match self.batches.entry(request_id.clone()) {
            Entry::Occupied(occupied) => occupied,
            Entry::Vacant(vacant) => vacant.insert_entry(BatchAccumulator::new(
                FETCH_BATCH,
                success,
                target.clone(),
                now,
            )),
        };
        let accumulator = entry.get_mut();

        if accumulator.declared_total != 0 && accumulator.declared_total != total_batches {
            warn!(
                target: "followee_bridge::batch",
                "Request {} changed total_batches from {} to {} mid-stream; using the latest",
                request_id,
                accumulator.declared_total,
                total_batches
            );
        }
        if accumulator.target.is_none() {
            accumulator.target = target;
        }

        accumulator.items.extend(data);
        accumulator.declared_total = total_batches;
        accumulator.received += 1;

        debug!(
            target: "followee_bridge::batch",
            "Request {}: received batch {}/{} ({} items so far)",
            request_id,
            accumulator.received,
            accumulator.declared_total,
            accumulator.items.len()
        );

        if !accumulator.is_complete() {
            if accumulator.received > accumulator.declared_total {
                warn!(
                    target: "followee_bridge::batch",
                    "Request {} received {} batches but declares only {}; waiting for the sweeper",
                    request_id,
                    accumulator.received,
                    accumulator.declared_total
                );
            }
            return ChunkProgress::Incomplete {
                received: accumulator.received,
                declared: accumulator.declared_total,
            };
        }

        accumulator.completed = true;
        let done = entry.remove();
        ChunkProgress::Complete(BatchResult {
            command: done.command,
            request_id,
            success: done.success,
            target: done.target,
            items: done.items,
        })
    }

    /// Remove and return every accumulator older than `deadline` at `now`,
    /// with how long it had been open.
    pub(crate) fn take_expired(
        &mut self,
        now: Instant,
        deadline: Duration,
    ) -> Vec<(RequestId, Duration)> {
        let mut expired = Vec::new();
        for (id, accumulator) in self.batches.iter_mut() {
            let age = now.saturating_duration_since(accumulator.created_at);
            if !accumulator.completed && age > deadline {
                accumulator.completed = true;
                expired.push((id.clone(), age));
            }
        }
        for (id, _) in &expired {
            self.batches.remove(id);
        }
        expired
    }

    pub(crate) fn remove(&mut self, id: &RequestId) -> bool {
        self.batches.remove(id).is_some()
    }

    /// Drop every accumulator, returning how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.batches.len();
        self.batches.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.batches.len()
    }

    #[cfg(test)]
    fn contains(&self, id: &RequestId) -> bool {
        self.batches.contains_key(id)
    }
}
