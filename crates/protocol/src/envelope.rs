//! HTTP body envelope for `/call`, `/post` and `/read`.
//!
//! Legacy daemons take the frame as a bare hex string. Daemons advertising
//! `protocolMessages` take a JSON object naming the framing variant:
//!
//! ```json
//! { "protocol": "v1", "data": "01000000020037" }
//! ```
//!
//! Responses come back in either shape.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::framing::Framing;

/// Frame bytes plus the variant they were framed with, as the daemon sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeProtocolMessage {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub protocol: Option<Framing>,
	pub data: String,
}

impl BridgeProtocolMessage {
	pub fn new(frame: &[u8], protocol: Option<Framing>) -> Self {
		Self {
			protocol,
			data: hex::encode(frame),
		}
	}

	/// Reads a response body: either a bare hex string or an envelope object.
	pub fn from_value(value: serde_json::Value) -> Option<Self> {
		match value {
			serde_json::Value::String(data) => Some(Self { protocol: None, data }),
			other => serde_json::from_value(other).ok(),
		}
	}

	/// Decoded frame bytes.
	pub fn frame(&self) -> Result<Vec<u8>> {
		hex::decode(self.data.trim()).map_err(|e| ProtocolError::malformed(format!("response is not hex: {e}")))
	}
}
