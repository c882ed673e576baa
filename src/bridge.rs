//! Bridge to the long-lived fetcher worker process.
//!
//! The worker speaks newline-delimited JSON on stdin/stdout and reports some
//! failures only as free text on stderr. This module multiplexes concurrent
//! commands over that single process.
//!
//! ## Module Structure
//!
//! - `protocol` - wire codec: request IDs, outbound commands, inbound messages
//! - `actor` - pending-request table, batch collector, reader and sweeper tasks
//! - `classifier` - best-effort attribution of stderr text to pending requests
//! - `engine` - single owner of both tables and the worker state
//! - `supervisor` - spawns the worker and serializes writes to its stdin
//! - `client` - the `Bridge` command API

mod actor;
mod classifier;
mod client;
mod engine;
mod protocol;
mod supervisor;
mod worker_state;

pub use classifier::{
    AttributionPolicy, DEFAULT_MESSAGE, DEFAULT_PATTERNS, ErrorClassifier, PatternClassifier,
};
pub use client::Bridge;
pub use protocol::{
    Ack, BatchChunk, BatchMetadata, Command, CommandKind, FetchResult, Followee, InboundMessage,
    LoginOutcome, RequestId, SingleResponse, StatusMessage, decode_line, encode,
};
pub use worker_state::WorkerState;
