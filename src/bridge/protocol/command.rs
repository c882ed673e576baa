//! Outbound commands for the worker.

use std::fmt;

use serde::Serialize;

use super::RequestId;
use crate::error::BridgeResult;

/// Command-specific fields, tagged on the wire by `command`.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandKind {
    /// Log the worker into the remote account. `code` is the optional 2FA code
    /// and is sent as `null` when absent.
    Login {
        username: String,
        password: String,
        code: Option<String>,
    },
    /// Fetch the followees of `target`; answered in batches.
    Fetch { target: String },
    /// Drop the worker's session.
    Logout {},
    /// Ask the worker to exit. No reply is expected.
    Shutdown {},
}

impl CommandKind {
    /// Command name as it appears in the `command` field.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Login { .. } => "login",
            CommandKind::Fetch { .. } => "fetch",
            CommandKind::Logout {} => "logout",
            CommandKind::Shutdown {} => "shutdown",
        }
    }
}

// Hand-written so credentials never reach the logs.
impl fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Login { username, code, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &"<redacted>")
                .field("code", &code.as_ref().map(|_| "<redacted>"))
                .finish(),
            CommandKind::Fetch { target } => {
                f.debug_struct("Fetch").field("target", target).finish()
            }
            CommandKind::Logout {} => f.write_str("Logout"),
            CommandKind::Shutdown {} => f.write_str("Shutdown"),
        }
    }
}

/// A command bound to its request ID. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    #[serde(flatten)]
    kind: CommandKind,
    request_id: RequestId,
}

impl Command {
    /// Bind `kind` to a freshly generated request ID.
    pub fn new(kind: CommandKind) -> Self {
        Self::with_id(kind, RequestId::generate())
    }

    pub(crate) fn with_id(kind: CommandKind, request_id: RequestId) -> Self {
        Self { kind, request_id }
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

/// Serialize a command as one line of JSON terminated by `\n`.
///
/// serde_json never emits raw newlines inside strings, so the output is
/// exactly one line.
pub fn encode(command: &Command) -> BridgeResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(command)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn encoded_value(kind: CommandKind) -> Value {
        let command = Command::with_id(kind, RequestId::from("req-1"));
        let bytes = encode(&command).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'), "line must end with newline");
        assert_eq!(
            bytes.iter().filter(|b| **b == b'\n').count(),
            1,
            "exactly one newline per command"
        );
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn login_encodes_credentials_and_null_code() {
        let value = encoded_value(CommandKind::Login {
            username: "alice".to_string(),
            password: "secret".to_string(),
            code: None,
        });

        assert_eq!(
            value,
            json!({
                "command": "login",
                "request_id": "req-1",
                "username": "alice",
                "password": "secret",
                "code": null
            })
        );
    }

    #[test]
    fn login_encodes_two_factor_code() {
        let value = encoded_value(CommandKind::Login {
            username: "alice".to_string(),
            password: "secret".to_string(),
            code: Some("123456".to_string()),
        });
        assert_eq!(value["code"], "123456");
    }

    #[test]
    fn fetch_encodes_target() {
        let value = encoded_value(CommandKind::Fetch {
            target: "bob".to_string(),
        });
        assert_eq!(
            value,
            json!({"command": "fetch", "request_id": "req-1", "target": "bob"})
        );
    }

    #[test]
    fn logout_and_shutdown_carry_only_command_and_id() {
        assert_eq!(
            encoded_value(CommandKind::Logout {}),
            json!({"command": "logout", "request_id": "req-1"})
        );
        assert_eq!(
            encoded_value(CommandKind::Shutdown {}),
            json!({"command": "shutdown", "request_id": "req-1"})
        );
    }

    #[test]
    fn newline_in_field_stays_escaped() {
        let command = Command::new(CommandKind::Fetch {
            target: "multi\nline".to_string(),
        });
        let bytes = encode(&command).unwrap();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn debug_output_redacts_password() {
        let command = Command::new(CommandKind::Login {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            code: Some("999999".to_string()),
        });
        let debug = format!("{:?}", command);

        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("999999"));
    }

    #[test]
    fn new_commands_get_distinct_ids() {
        let a = Command::new(CommandKind::Logout {});
        let b = Command::new(CommandKind::Logout {});
        assert_ne!(a.request_id(), b.request_id());
    }
}
