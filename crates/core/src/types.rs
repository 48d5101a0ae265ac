//! Descriptor, session and operation input types.

use std::fmt;

use hwbridge_protocol::Framing;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::DescriptorDiff;
use crate::error::TransportError;

/// Opaque session token issued by the daemon on acquire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session(String);

impl Session {
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for Session {
	fn from(token: &str) -> Self {
		Self::new(token)
	}
}

impl From<String> for Session {
	fn from(token: String) -> Self {
		Self(token)
	}
}

/// One enumerated device interface as reported by the daemon.
///
/// `session` is always serialized (as `null` when unowned) because the
/// daemon compares listen baselines field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
	pub path: String,
	#[serde(default)]
	pub session: Option<Session>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub product: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub vendor: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub debug: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub debug_session: Option<Session>,
}

impl Descriptor {
	/// Unowned descriptor for `path`.
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			session: None,
			product: None,
			vendor: None,
			debug: None,
			debug_session: None,
		}
	}

	pub fn with_session(mut self, session: Option<Session>) -> Self {
		self.session = session;
		self
	}
}

/// Input for [`Transport::acquire`](crate::Transport::acquire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireInput {
	pub path: String,
	/// Last session known for `path`; `None` when the caller believes it unowned.
	pub previous: Option<Session>,
}

/// Input for [`Transport::release`](crate::Transport::release).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInput {
	pub path: String,
	pub session: Session,
	/// Fire-and-forget teardown: skip listen-loop reconciliation.
	pub on_close: bool,
}

/// Input for `call` and `send`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallInput {
	pub session: Session,
	pub name: String,
	pub data: Value,
	/// Framing override; ignored by daemons without protocol messages.
	pub protocol: Option<Framing>,
}

impl CallInput {
	pub fn new(session: Session, name: impl Into<String>, data: Value) -> Self {
		Self {
			session,
			name: name.into(),
			data,
			protocol: None,
		}
	}
}

/// Input for `receive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveInput {
	pub session: Session,
	pub protocol: Option<Framing>,
}

impl ReceiveInput {
	pub fn new(session: Session) -> Self {
		Self { session, protocol: None }
	}
}

/// Notifications published to transport subscribers.
#[derive(Debug, Clone)]
pub enum TransportEvent {
	/// A descriptor snapshot changed something.
	Update(DescriptorDiff),
	/// The listen loop hit a fatal transport error and stopped.
	Error(TransportError),
}
