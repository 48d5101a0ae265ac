//! Wire codec for hardware wallet bridge messages.
//!
//! This crate turns structured messages into the bytes a bridge daemon
//! forwards to the device, and back. It is pure: no I/O, no state.
//!
//! * [`schema`]: caller-supplied message table (name → wire type + fields)
//! * [`message`]: schema-driven body encoding
//! * [`framing`]: legacy and versioned frame envelopes
//! * [`envelope`]: the JSON/hex shape used on the HTTP boundary

pub mod envelope;
pub mod error;
pub mod framing;
pub mod message;
pub mod schema;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use envelope::BridgeProtocolMessage;
pub use error::{ProtocolError, Result};
pub use framing::{Framing, PROTOCOL_VERSION};
pub use schema::{FieldDef, FieldRule, FieldType, MessageDef, MessageSchema};

/// A decoded device message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedMessage {
	/// Message name from the schema table.
	#[serde(rename = "type")]
	pub name: String,
	/// Field values keyed by field name.
	#[serde(rename = "message")]
	pub payload: Value,
}

/// Encodes message `name` with `payload` into a frame of the given variant.
pub fn encode(schema: &MessageSchema, framing: Framing, name: &str, payload: &Value) -> Result<Vec<u8>> {
	let body = message::encode_body(schema, name, payload)?;
	framing.wrap(body)
}

/// Decodes a frame of the given variant.
pub fn decode(schema: &MessageSchema, framing: Framing, frame: &[u8]) -> Result<DecodedMessage> {
	let body = framing.unwrap(frame)?;
	let (name, payload) = message::decode_body(schema, body)?;
	Ok(DecodedMessage { name, payload })
}
