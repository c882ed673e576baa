//! Actor components for the worker bridge.
//!
//! # Components
//!
//! - `PendingRequests`: correlation table routing replies to oneshot waiters
//! - `BatchCollector`: reassembles fetch replies streamed in chunks
//! - `Reader`: background tasks draining the worker's stdout and stderr
//! - `Sweeper`: background task failing batch streams that never complete

mod batch_collector;
mod reader;
mod response_router;
mod sweeper;
mod task_handle;

pub(crate) use batch_collector::{BatchCollector, ChunkProgress};
pub(crate) use reader::{StreamKind, spawn_reader_task};
pub(crate) use response_router::{PendingRequests, Resolution};
pub(crate) use sweeper::spawn_sweeper_task;
pub(crate) use task_handle::TaskHandle;
