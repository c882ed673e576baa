//! Wire codec for the worker protocol.
//!
//! Newline-delimited UTF-8 JSON, one message per line, both directions.
//!
//! ## Module Structure
//!
//! - `request_id` - RequestId type echoed back by the worker
//! - `command` - outbound commands and their encoding
//! - `message` - inbound message shapes and line decoding
//! - `response` - result shapes handed to callers

mod command;
mod message;
mod request_id;
mod response;

pub use command::{Command, CommandKind, encode};
pub use message::{
    BatchChunk, BatchMetadata, InboundMessage, SingleResponse, StatusMessage, decode_line,
};
pub(crate) use message::{FETCH_BATCH, FETCH_RESPONSE};
pub use request_id::RequestId;
pub use response::{Ack, FetchResult, Followee, LoginOutcome};
pub(crate) use response::{BatchResult, Reply};
