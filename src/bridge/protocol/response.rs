//! Result shapes handed back to callers of the command API.

use serde::{Deserialize, Deserializer, Serialize};

use super::{RequestId, SingleResponse};
use crate::error::{BridgeError, BridgeResult};

/// One account followed by the fetch target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Followee {
    pub username: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub full_name: String,
}

/// Workers send `null` for accounts without a display name.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Aggregated result of a batched fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub target: String,
    /// Items in chunk arrival order.
    pub items: Vec<Followee>,
}

/// Outcome of a login command. A rejected login is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginOutcome {
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Plain acknowledgement (logout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub success: bool,
}

/// Fully reassembled batch stream, as produced by the batch collector.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BatchResult {
    pub(crate) command: String,
    pub(crate) request_id: RequestId,
    pub(crate) success: bool,
    pub(crate) target: Option<String>,
    pub(crate) items: Vec<Followee>,
}

/// Successful resolution of a pending request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reply {
    Single(SingleResponse),
    Batch(BatchResult),
}

/// Reply command the worker uses for commands it does not understand.
const UNKNOWN_COMMAND_REPLY: &str = "error";

impl Reply {
    fn describe(&self) -> String {
        match self {
            Reply::Single(single) => format!("{} reply", single.command),
            Reply::Batch(batch) => format!("{} batch of {} items", batch.command, batch.items.len()),
        }
    }

    fn unexpected(self, command: &str) -> BridgeError {
        BridgeError::UnexpectedReply {
            command: command.to_string(),
            reply: self.describe(),
        }
    }

    /// Reject the worker's unknown-command reply before shape-specific handling.
    fn reject_unknown_command(self, command: &str) -> BridgeResult<Self> {
        match self {
            Reply::Single(single) if single.command == UNKNOWN_COMMAND_REPLY => Err(
                BridgeError::command_failed(command, single.error_text().unwrap_or("unknown command")),
            ),
            other => Ok(other),
        }
    }

    pub(crate) fn into_login_outcome(self) -> BridgeResult<LoginOutcome> {
        match self.reject_unknown_command("login")? {
            Reply::Single(single) => Ok(LoginOutcome {
                logged_in: single.success,
                error: if single.success {
                    None
                } else {
                    single.error_text().map(str::to_string)
                },
            }),
            other => Err(other.unexpected("login")),
        }
    }

    pub(crate) fn into_fetch_result(self, requested: &str) -> BridgeResult<FetchResult> {
        match self.reject_unknown_command("fetch")? {
            Reply::Batch(batch) if batch.success => Ok(FetchResult {
                target: batch.target.unwrap_or_else(|| requested.to_string()),
                items: batch.items,
            }),
            Reply::Batch(_) => Err(BridgeError::command_failed("fetch", "batch reported failure")),
            Reply::Single(single) if !single.success => Err(BridgeError::command_failed(
                "fetch",
                single.error_text().unwrap_or("fetch failed"),
            )),
            other => Err(other.unexpected("fetch")),
        }
    }

    pub(crate) fn into_ack(self, command: &str) -> BridgeResult<Ack> {
        match self.reject_unknown_command(command)? {
            Reply::Single(single) => Ok(Ack {
                success: single.success,
            }),
            other => Err(other.unexpected(command)),
        }
    }
}
