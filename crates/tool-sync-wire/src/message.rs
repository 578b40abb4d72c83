//! The `ToolRendererV1` message envelope.
//!
//! ```json
//! { "protocol": "ToolRendererV1", "command": "get",    "toolId": "t1" }
//! { "protocol": "ToolRendererV1", "command": "set",    "toolId": "t1", "delta": <State> }
//! { "protocol": "ToolRendererV1", "command": "update", "toolId": "t1", "delta": <Delta> }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::State;

/// Protocol id stamped on every message.
pub const PROTOCOL: &str = "ToolRendererV1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Ask the other peer for a full snapshot.
    Get,
    /// Full snapshot; the receiver re-initializes its tree from it.
    Set,
    /// Incremental delta.
    Update,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Get => "get",
            Command::Set => "set",
            Command::Update => "update",
        }
    }

    /// Whether a well-formed message with this command carries a `delta`.
    pub fn carries_delta(self) -> bool {
        !matches!(self, Command::Get)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub protocol: String,
    pub command: Command,
    #[serde(rename = "toolId")]
    pub tool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<State>,
}

impl WireMessage {
    pub fn get(tool_id: impl Into<String>) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            command: Command::Get,
            tool_id: tool_id.into(),
            delta: None,
        }
    }

    pub fn set(tool_id: impl Into<String>, state: State) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            command: Command::Set,
            tool_id: tool_id.into(),
            delta: Some(state),
        }
    }

    pub fn update(tool_id: impl Into<String>, delta: State) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            command: Command::Update,
            tool_id: tool_id.into(),
            delta: Some(delta),
        }
    }

    /// Replace the protocol id (for channels that speak a renamed dialect).
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Inbound filter: both the protocol id and the tool id must match.
    pub fn is_addressed_to(&self, protocol: &str, tool_id: &str) -> bool {
        self.protocol == protocol && self.tool_id == tool_id
    }
}
