//! Inbound worker messages and line decoding.
//!
//! Messages carry no type tag; they are told apart by shape:
//!
//! | shape                                                   | variant         |
//! |---------------------------------------------------------|-----------------|
//! | `status` present, no `request_id`                        | `Status`        |
//! | `command == "fetch_batch"` with `request_id`             | `BatchChunk`    |
//! | `command == "fetch_response"` with `request_id`, no data | `BatchMetadata` |
//! | any other `command` with `request_id`                    | `Single`        |
//!
//! The worker reports `success` as a boolean on some paths and as the string
//! `"false"` on others. It is normalized to `bool` here and nowhere else.

use serde_json::{Map, Value};

use super::{Followee, RequestId};
use crate::error::{BridgeError, BridgeResult};

pub(crate) const FETCH_RESPONSE: &str = "fetch_response";
pub(crate) const FETCH_BATCH: &str = "fetch_batch";

/// Longest slice of an offending line kept in a parse error.
const MAX_ERROR_LINE_LEN: usize = 200;

/// A decoded line from the worker's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Status(StatusMessage),
    Single(SingleResponse),
    BatchMetadata(BatchMetadata),
    BatchChunk(BatchChunk),
}

impl InboundMessage {
    /// Request ID carried by the message, if any.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            InboundMessage::Status(_) => None,
            InboundMessage::Single(m) => Some(&m.request_id),
            InboundMessage::BatchMetadata(m) => Some(&m.request_id),
            InboundMessage::BatchChunk(m) => Some(&m.request_id),
        }
    }
}

/// Out-of-band status report (`ready`, `info`, `error`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub status: String,
    pub message: String,
}

impl StatusMessage {
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

/// Reply that completes its request on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleResponse {
    pub command: String,
    pub request_id: RequestId,
    pub success: bool,
    /// Every other field of the reply (`error`, `message`, ...).
    pub fields: Map<String, Value>,
}

impl SingleResponse {
    /// Human-readable failure text reported by the worker, if any.
    pub fn error_text(&self) -> Option<&str> {
        self.fields
            .get("error")
            .or_else(|| self.fields.get("message"))
            .and_then(Value::as_str)
    }
}

/// Header of a batched fetch reply.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMetadata {
    pub request_id: RequestId,
    pub success: bool,
    pub target: Option<String>,
    /// Failure text when `success` is false.
    pub error: Option<String>,
}

/// One chunk of a batched fetch reply.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchChunk {
    pub request_id: RequestId,
    pub success: bool,
    pub target: Option<String>,
    pub data: Vec<Followee>,
    pub total_batches: u32,
}

/// Normalize the worker's `success` field: only `true` (or the string
/// `"true"`) counts as success; anything else, including absence, is failure.
pub(crate) fn normalize_success(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Decode one line of worker output.
///
/// Lines that are not JSON objects, or whose shape matches no known message,
/// yield `BridgeError::Parse`. Callers log and drop those; they never fail a
/// pending request.
pub fn decode_line(line: &str) -> BridgeResult<InboundMessage> {
    let trimmed = line.trim();
    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| parse_error(trimmed, e.to_string()))?;

    let Value::Object(mut object) = value else {
        return Err(parse_error(trimmed, "expected a JSON object"));
    };

    let Some(request_id) = RequestId::from_json(&object) else {
        return match object.get("status").and_then(Value::as_str) {
            Some(status) => Ok(InboundMessage::Status(StatusMessage {
                status: status.to_string(),
                message: object
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })),
            None => Err(parse_error(trimmed, "message has neither status nor request_id")),
        };
    };

    let command = match object.remove("command") {
        Some(Value::String(command)) => command,
        _ => return Err(parse_error(trimmed, "reply is missing its command")),
    };
    object.remove("request_id");
    let success = normalize_success(object.remove("success").as_ref());
    let target = object
        .get("target")
        .and_then(Value::as_str)
        .map(str::to_string);

    match command.as_str() {
        FETCH_BATCH => {
            let data = match object.remove("data") {
                Some(data) => serde_json::from_value::<Vec<Followee>>(data)
                    .map_err(|e| parse_error(trimmed, format!("invalid batch data: {}", e)))?,
                None => return Err(parse_error(trimmed, "batch chunk is missing data")),
            };
            let total_batches = object
                .get("total_batches")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| parse_error(trimmed, "batch chunk is missing total_batches"))?;

            Ok(InboundMessage::BatchChunk(BatchChunk {
                request_id,
                success,
                target,
                data,
                total_batches,
            }))
        }
        FETCH_RESPONSE if !object.contains_key("data") => {
            Ok(InboundMessage::BatchMetadata(BatchMetadata {
                request_id,
                success,
                target,
                error: object
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }))
        }
        _ => Ok(InboundMessage::Single(SingleResponse {
            command,
            request_id,
            success,
            fields: object,
        })),
    }
}

fn parse_error(line: &str, message: impl Into<String>) -> BridgeError {
    let line = match line.char_indices().nth(MAX_ERROR_LINE_LEN) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    };
    BridgeError::Parse {
        line,
        message: message.into(),
    }
}
