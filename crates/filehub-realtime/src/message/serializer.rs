//! JSON encoding of outbound messages and decoding of inbound commands.

use serde::Serialize;

use filehub_core::result::AppResult;

use super::types::Command;
use super::validator::validate_inbound;

/// Serialize an outbound message to its wire text.
pub fn encode<T: Serialize>(message: &T) -> AppResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// Validate and decode an inbound command envelope.
pub fn decode_command(raw: &str) -> AppResult<Command> {
    validate_inbound(raw)?;
    Ok(serde_json::from_str(raw)?)
}
