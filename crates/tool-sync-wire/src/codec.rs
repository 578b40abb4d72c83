//! JSON codec for [`WireMessage`].
//!
//! Encoding is plain serde. Decoding additionally checks the command/delta
//! pairing: `get` must not carry a delta, `set` and `update` must.
//! Protocol ids are *not* checked here; foreign protocols are dropped by the
//! receiving socket's inbound filter, not rejected as malformed.

use serde::Deserialize;
use serde_json::Value;

use crate::message::{Command, WireMessage};

/// Errors that can occur while decoding a wire message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{0}` message is missing its delta")]
    MissingDelta(Command),
    #[error("`{0}` message must not carry a delta")]
    UnexpectedDelta(Command),
}

/// Encode a message to a JSON value.
pub fn encode(message: &WireMessage) -> Value {
    serde_json::to_value(message).unwrap_or(Value::Null)
}

/// Encode a message to a compact JSON string (one line, no trailing newline).
pub fn encode_string(message: &WireMessage) -> String {
    encode(message).to_string()
}

/// Decode a message from a JSON value.
pub fn decode(value: &Value) -> Result<WireMessage, DecodeError> {
    let message = WireMessage::deserialize(value)?;
    validate(message)
}

/// Decode a message from JSON text.
pub fn decode_str(text: &str) -> Result<WireMessage, DecodeError> {
    let message: WireMessage = serde_json::from_str(text)?;
    validate(message)
}

fn validate(message: WireMessage) -> Result<WireMessage, DecodeError> {
    match (message.command.carries_delta(), message.delta.is_some()) {
        (true, false) => Err(DecodeError::MissingDelta(message.command)),
        (false, true) => Err(DecodeError::UnexpectedDelta(message.command)),
        _ => Ok(message),
    }
}
