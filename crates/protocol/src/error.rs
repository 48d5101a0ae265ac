//! Codec failures.

use thiserror::Error;

/// Errors raised while encoding or decoding bridge messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
	/// The message name is not present in the schema table.
	#[error("unknown message: {0}")]
	UnknownMessage(String),

	/// The payload does not fit the message's field layout.
	#[error("invalid payload for {message}: {reason}")]
	InvalidPayload { message: String, reason: String },

	/// The byte stream does not match a recognized frame header, declared
	/// length, or field layout.
	#[error("malformed protocol: {0}")]
	Malformed(String),

	/// The schema table itself is inconsistent.
	#[error("invalid schema: {0}")]
	InvalidSchema(String),
}

impl ProtocolError {
	pub(crate) fn malformed(reason: impl Into<String>) -> Self {
		Self::Malformed(reason.into())
	}

	pub(crate) fn invalid(message: &str, reason: impl Into<String>) -> Self {
		Self::InvalidPayload {
			message: message.to_string(),
			reason: reason.into(),
		}
	}
}

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
