//! Error taxonomy shared by every transport operation.
//!
//! Operations return [`Result<T>`], whose error side is a [`TransportError`]:
//! a closed [`ErrorKind`] plus optional diagnostic text. Daemon error strings
//! are free-form; [`TransportError::from_daemon`] maps the ones an endpoint is
//! known to produce and collapses everything else into
//! [`ErrorKind::UnexpectedError`] with the original text kept.

use std::fmt;

use hwbridge_protocol::ProtocolError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed vocabulary of failure causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
	#[error("Malformed protocol format")]
	MalformedProtocol,
	#[error("Network request failed")]
	HttpError,
	#[error("Wrong result type.")]
	WrongResultType,
	#[error("unexpected error")]
	UnexpectedError,
	#[error("device not found")]
	DeviceNotFound,
	#[error("wrong previous session")]
	SessionWrongPrevious,
	#[error("unable to open device")]
	InterfaceUnableToOpenDevice,
	#[error("device disconnected during action")]
	DeviceDisconnectedDuringAction,
	#[error("session not found")]
	SessionNotFound,
	#[error("other call in progress")]
	OtherCallInProgress,
	#[error("Already listening")]
	AlreadyListening,
	#[error("Aborted by signal")]
	Aborted,
	#[error("Aborted by timeout")]
	Timeout,
	#[error("unknown message")]
	UnknownMessage,
	#[error("invalid payload")]
	InvalidPayload,
	#[error("transport is not initialized")]
	TransportNotInitialized,
}

impl ErrorKind {
	/// Kinds a daemon may report in its `{"error": "..."}` body.
	const DAEMON_REPORTED: [ErrorKind; 7] = [
		ErrorKind::SessionWrongPrevious,
		ErrorKind::DeviceNotFound,
		ErrorKind::InterfaceUnableToOpenDevice,
		ErrorKind::DeviceDisconnectedDuringAction,
		ErrorKind::SessionNotFound,
		ErrorKind::OtherCallInProgress,
		ErrorKind::MalformedProtocol,
	];

	/// Recognizes daemon error text. Matching is case-insensitive and tolerant
	/// of prefixes such as `"LIBUSB_ERROR_ACCESS: unable to open device"`.
	fn from_daemon_text(text: &str) -> Option<ErrorKind> {
		let lowered = text.to_lowercase();
		Self::DAEMON_REPORTED.into_iter().find(|kind| {
			let needle = kind.to_string().to_lowercase();
			lowered.contains(&needle) || (*kind == ErrorKind::MalformedProtocol && lowered.contains("malformed"))
		})
	}

	/// Application-level conditions a caller is expected to handle, such as a
	/// lost acquire race or a busy session. Other kinds are not retryable.
	pub fn is_recoverable(self) -> bool {
		matches!(
			self,
			ErrorKind::SessionWrongPrevious | ErrorKind::SessionNotFound | ErrorKind::OtherCallInProgress
		)
	}
}

/// A typed failure returned by a transport operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError {
	pub kind: ErrorKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

impl TransportError {
	pub fn new(kind: ErrorKind) -> Self {
		Self { kind, message: None }
	}

	pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: Some(message.into()),
		}
	}

	/// Maps daemon error text against the kinds an endpoint declares.
	///
	/// Text naming a kind outside `expected` is not trusted as typed and
	/// becomes [`ErrorKind::UnexpectedError`] carrying the raw text.
	pub fn from_daemon(text: &str, expected: &[ErrorKind]) -> Self {
		match ErrorKind::from_daemon_text(text) {
			Some(kind) if expected.contains(&kind) => Self::new(kind),
			_ => Self::with_message(ErrorKind::UnexpectedError, text),
		}
	}

	pub fn kind(&self) -> ErrorKind {
		self.kind
	}
}

impl From<ErrorKind> for TransportError {
	fn from(kind: ErrorKind) -> Self {
		Self::new(kind)
	}
}

impl From<ProtocolError> for TransportError {
	fn from(err: ProtocolError) -> Self {
		let kind = match &err {
			ProtocolError::UnknownMessage(_) => ErrorKind::UnknownMessage,
			ProtocolError::InvalidPayload { .. } | ProtocolError::InvalidSchema(_) => ErrorKind::InvalidPayload,
			ProtocolError::Malformed(_) => ErrorKind::MalformedProtocol,
		};
		Self::with_message(kind, err.to_string())
	}
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.message {
			Some(message) => write!(f, "{}: {}", self.kind, message),
			None => write!(f, "{}", self.kind),
		}
	}
}

impl std::error::Error for TransportError {}

/// Result alias used by every transport operation.
pub type Result<T> = std::result::Result<T, TransportError>;
