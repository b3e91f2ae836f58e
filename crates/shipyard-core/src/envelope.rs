//! Outbound message envelope shared by sessions and the reconciler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tagged success/error message written to a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Result payload of a session command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub result: String,
}

impl Envelope {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// Successful command execution carrying `{command, result}`.
    pub fn command(command: &str, result: impl Into<String>) -> Self {
        let payload = CommandResult {
            command: command.to_string(),
            result: result.into(),
        };
        Self::ok(
            "command execute success",
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }

    /// Decode `data` as a command result, if it is one.
    pub fn command_result(&self) -> Option<CommandResult> {
        self.data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
