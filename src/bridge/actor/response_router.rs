//! Correlation table for pending worker requests.
//!
//! This module provides `PendingRequests`, which tracks in-flight commands
//! and delivers each one's resolution to its waiter via a oneshot channel.
//!
//! # Usage
//!
//! ```ignore
//! let rx = pending.register(request_id, "fetch")?;  // Before writing the command
//! // ... write command to worker stdin ...
//! let resolution = rx.await?;  // Wait without holding the engine lock
//! ```
//!
//! The table is plain data: the engine keeps it behind the same mutex as the
//! batch collector so both are mutated under one discipline.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::bridge::protocol::{Reply, RequestId};
use crate::error::BridgeError;

/// What a waiter receives: the worker's reply, or the reason there is none.
pub(crate) type Resolution = Result<Reply, BridgeError>;

/// Routes resolutions to pending requests.
///
/// Each entry owns the sending half of a oneshot channel. Resolving consumes
/// the sender, so a request can be resolved at most once by construction.
pub(crate) struct PendingRequests {
    pending: HashMap<RequestId, PendingEntry>,
    /// Registration counter; orders entries by insertion.
    next_seq: u64,
}

struct PendingEntry {
    seq: u64,
    command: &'static str,
    sender: oneshot::Sender<Resolution>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Register a pending request and return a receiver for its resolution.
    ///
    /// Must be called before the command is written so a fast reply always
    /// finds its entry.
    ///
    /// Returns `None` if a request with this ID is already pending.
    pub(crate) fn register(
        &mut self,
        id: RequestId,
        command: &'static str,
    ) -> Option<oneshot::Receiver<Resolution>> {
        if self.pending.contains_key(&id) {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(
            id,
            PendingEntry {
                seq,
                command,
                sender: tx,
            },
        );
        Some(rx)
    }

    /// Resolve a pending request, removing it from the table.
    ///
    /// A miss (already resolved, or never registered) is a no-op.
    ///
    /// Returns `true` if the resolution was delivered to a live waiter.
    pub(crate) fn resolve(&mut self, id: &RequestId, resolution: Resolution) -> bool {
        match self.pending.remove(id) {
            Some(entry) => entry.sender.send(resolution).is_ok(),
            None => false,
        }
    }

    /// Remove a pending request without resolving it.
    ///
    /// Used when the command could not be written. Dropping the sender makes
    /// the waiter observe a closed channel.
    ///
    /// Returns `true` if the request was removed, `false` if it wasn't pending.
    pub(crate) fn remove(&mut self, id: &RequestId) -> bool {
        self.pending.remove(id).is_some()
    }

    pub(crate) fn contains(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    /// Command name the request was registered for.
    pub(crate) fn command_of(&self, id: &RequestId) -> Option<&'static str> {
        self.pending.get(id).map(|entry| entry.command)
    }

    /// Most recently registered pending request.
    pub(crate) fn latest(&self) -> Option<RequestId> {
        self.pending
            .iter()
            .max_by_key(|(_, entry)| entry.seq)
            .map(|(id, _)| id.clone())
    }

    /// The pending request, if exactly one is outstanding.
    pub(crate) fn sole(&self) -> Option<RequestId> {
        if self.pending.len() == 1 {
            self.pending.keys().next().cloned()
        } else {
            None
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fail every pending request with `failure` and empty the table.
    ///
    /// Returns the number of requests that were pending.
    pub(crate) fn reject_all(&mut self, failure: &BridgeError) -> usize {
        let entries: Vec<_> = self.pending.drain().collect();
        let count = entries.len();

        for (_, entry) in entries {
            let _ = entry.sender.send(Err(failure.clone()));
        }
        count
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}
