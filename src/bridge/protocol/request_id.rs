//! Request ID type for worker correlation.
//!
//! This module provides a type-safe wrapper for request IDs, preventing
//! confusion with the other strings that travel on the wire (usernames,
//! targets, command names).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned by the bridge to every outbound command.
///
/// The worker treats it as opaque and echoes it back as `request_id` on
/// every reply belonging to the command.
///
/// # Wire Format
///
/// Always a string. IDs generated here are random UUIDv4s, but any string
/// echoed back by the worker decodes, so unknown IDs can be matched (and
/// ignored) rather than rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh identifier, unique for the lifetime of the process.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as sent on the wire.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract a RequestId from a decoded worker message.
    ///
    /// Returns `None` if the message has no string `request_id` field
    /// (status messages never carry one).
    pub(crate) fn from_json(message: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        message
            .get("request_id")?
            .as_str()
            .map(|id| Self(id.to_string()))
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
