//! The two framing variants a bridge daemon may accept.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Version byte written in front of versioned frames.
pub const PROTOCOL_VERSION: u8 = 1;

/// `[version: u8][length: u32 BE]`
pub const VERSIONED_HEADER_LEN: usize = 5;

/// Framing applied around an encoded message body.
///
/// The codec is always told which variant to use; it never infers it from
/// the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Framing {
	/// Plain message body. The daemon infers boundaries from the request.
	#[serde(rename = "bridge")]
	Legacy,
	/// Body prefixed with `{protocol_version, length}`.
	#[serde(rename = "v1")]
	Versioned,
}

impl Framing {
	/// Name used for this variant in bridge request envelopes.
	pub fn name(self) -> &'static str {
		match self {
			Framing::Legacy => "bridge",
			Framing::Versioned => "v1",
		}
	}

	/// Wraps an encoded message body into a frame.
	pub fn wrap(self, body: Vec<u8>) -> Result<Vec<u8>> {
		match self {
			Framing::Legacy => Ok(body),
			Framing::Versioned => {
				let len = u32::try_from(body.len()).map_err(|_| ProtocolError::malformed("message body exceeds u32 length"))?;
				let mut frame = Vec::with_capacity(VERSIONED_HEADER_LEN + body.len());
				frame.push(PROTOCOL_VERSION);
				frame.extend_from_slice(&len.to_be_bytes());
				frame.extend_from_slice(&body);
				Ok(frame)
			}
		}
	}

	/// Strips the frame envelope, returning the message body.
	pub fn unwrap(self, frame: &[u8]) -> Result<&[u8]> {
		match self {
			Framing::Legacy => Ok(frame),
			Framing::Versioned => {
				if frame.len() < VERSIONED_HEADER_LEN {
					return Err(ProtocolError::malformed(format!("frame header needs {VERSIONED_HEADER_LEN} bytes, got {}", frame.len())));
				}
				if frame[0] != PROTOCOL_VERSION {
					return Err(ProtocolError::malformed(format!("unsupported protocol version {}", frame[0])));
				}
				let declared = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
				let body = &frame[VERSIONED_HEADER_LEN..];
				if body.len() != declared {
					return Err(ProtocolError::malformed(format!("declared length {declared}, got {}", body.len())));
				}
				Ok(body)
			}
		}
	}
}

impl fmt::Display for Framing {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for Framing {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"bridge" | "legacy" => Ok(Framing::Legacy),
			"v1" | "versioned" => Ok(Framing::Versioned),
			_ => Err(format!("unknown protocol: {s}")),
		}
	}
}
