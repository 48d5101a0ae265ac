//! Session transport interface.
//!
//! A [`Transport`] mediates exclusive access to devices: it enumerates them,
//! follows arrivals and departures through a background listen loop, hands
//! out sessions on [`acquire`](Transport::acquire) and exchanges framed
//! messages within a session.
//!
//! # Lifecycle
//!
//! A transport is constructed inert. [`init`](Transport::init) probes the
//! backend and activates it; [`listen`](Transport::listen) starts the loop;
//! [`stop`](Transport::stop) tears everything down and may be followed by
//! another `init`. Until `init` succeeds (and again after `stop`) every
//! operation except `stop` and `release_device` fails with
//! [`ErrorKind::TransportNotInitialized`](crate::ErrorKind::TransportNotInitialized).
//!
//! # Cancellation
//!
//! Every async operation takes an optional [`CancellationToken`]. Firing it,
//! calling `stop`, or running past the operation's timeout resolves the call
//! with `aborted` or `timeout` and releases anything the call registered.
//!
//! # Errors
//!
//! [`Operation::expected_errors`] lists every [`ErrorKind`] an operation can
//! fail with. Daemon text outside that list arrives as `unexpected-error`.

pub(crate) mod shared;
pub(crate) mod state;

use async_trait::async_trait;
use hwbridge_protocol::DecodedMessage;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, Result};
use crate::types::{AcquireInput, CallInput, Descriptor, ReceiveInput, ReleaseInput, Session, TransportEvent};

/// Fallible transport operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
	Init,
	Enumerate,
	Listen,
	Acquire,
	Release,
	Call,
	Send,
	Receive,
}

impl Operation {
	pub const ALL: [Operation; 8] = [
		Operation::Init,
		Operation::Enumerate,
		Operation::Listen,
		Operation::Acquire,
		Operation::Release,
		Operation::Call,
		Operation::Send,
		Operation::Receive,
	];

	pub fn name(self) -> &'static str {
		match self {
			Operation::Init => "init",
			Operation::Enumerate => "enumerate",
			Operation::Listen => "listen",
			Operation::Acquire => "acquire",
			Operation::Release => "release",
			Operation::Call => "call",
			Operation::Send => "send",
			Operation::Receive => "receive",
		}
	}

	/// Every error kind the operation may return.
	///
	/// Acquire and release waiters settle with `session-wrong-previous` or
	/// `device-disconnected-during-action`, and with the listen loop's own
	/// error (`http-error`, `wrong-result-type`, `unexpected-error`) when the
	/// loop dies under them. `call` and `receive` run without a timeout.
	pub fn expected_errors(self) -> &'static [ErrorKind] {
		use ErrorKind::*;
		match self {
			Operation::Init => &[HttpError, WrongResultType, UnexpectedError, Aborted, Timeout],
			Operation::Enumerate => &[TransportNotInitialized, HttpError, WrongResultType, UnexpectedError, Aborted, Timeout],
			Operation::Listen => &[TransportNotInitialized, AlreadyListening, UnexpectedError],
			Operation::Acquire => &[
				TransportNotInitialized,
				HttpError,
				WrongResultType,
				UnexpectedError,
				Aborted,
				Timeout,
				SessionWrongPrevious,
				DeviceNotFound,
				InterfaceUnableToOpenDevice,
				DeviceDisconnectedDuringAction,
			],
			Operation::Release => &[
				TransportNotInitialized,
				HttpError,
				WrongResultType,
				UnexpectedError,
				Aborted,
				Timeout,
				SessionNotFound,
				DeviceDisconnectedDuringAction,
			],
			Operation::Call => &[
				TransportNotInitialized,
				HttpError,
				WrongResultType,
				UnexpectedError,
				Aborted,
				SessionNotFound,
				DeviceDisconnectedDuringAction,
				OtherCallInProgress,
				MalformedProtocol,
				UnknownMessage,
				InvalidPayload,
			],
			Operation::Send => &[
				TransportNotInitialized,
				HttpError,
				UnexpectedError,
				Aborted,
				Timeout,
				SessionNotFound,
				DeviceDisconnectedDuringAction,
				OtherCallInProgress,
				MalformedProtocol,
				UnknownMessage,
				InvalidPayload,
			],
			Operation::Receive => &[
				TransportNotInitialized,
				HttpError,
				WrongResultType,
				UnexpectedError,
				Aborted,
				SessionNotFound,
				DeviceDisconnectedDuringAction,
				OtherCallInProgress,
				MalformedProtocol,
			],
		}
	}

	pub fn declares(self, kind: ErrorKind) -> bool {
		self.expected_errors().contains(&kind)
	}
}

/// Operations shared by every concrete transport.
///
/// Each fallible method fails only with the kinds its [`Operation`] declares.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Short backend name, e.g. `"BridgeTransport"`.
	fn name(&self) -> &'static str;

	/// Probes the backend and activates the instance. A no-op when already active.
	///
	/// Errors: [`Operation::Init`].
	async fn init(&self, signal: Option<CancellationToken>) -> Result<()>;

	/// Current descriptor list as reported by the backend.
	///
	/// Errors: [`Operation::Enumerate`].
	async fn enumerate(&self, signal: Option<CancellationToken>) -> Result<Vec<Descriptor>>;

	/// Starts the background listen loop. Must be called from within a tokio runtime.
	///
	/// Errors: [`Operation::Listen`]. Later loop failures arrive as
	/// [`TransportEvent::Error`].
	fn listen(&self) -> Result<()>;

	/// Takes exclusive ownership of `input.path`.
	///
	/// While listening this returns only after the listen loop has observed
	/// the new session, so [`descriptors`](Transport::descriptors) already
	/// reflects it.
	///
	/// Errors: [`Operation::Acquire`].
	async fn acquire(&self, input: AcquireInput, signal: Option<CancellationToken>) -> Result<Session>;

	/// Gives up the session on `input.path`; `on_close` returns before the
	/// daemon answers.
	///
	/// Errors: [`Operation::Release`].
	async fn release(&self, input: ReleaseInput, signal: Option<CancellationToken>) -> Result<()>;

	/// Sends a message and waits for the paired response. No default timeout.
	///
	/// Errors: [`Operation::Call`].
	async fn call(&self, input: CallInput, signal: Option<CancellationToken>) -> Result<DecodedMessage>;

	/// Errors: [`Operation::Send`].
	async fn send(&self, input: CallInput, signal: Option<CancellationToken>) -> Result<()>;

	/// Reads the next message queued for the session. No default timeout.
	///
	/// Errors: [`Operation::Receive`].
	async fn receive(&self, input: ReceiveInput, signal: Option<CancellationToken>) -> Result<DecodedMessage>;

	/// Best-effort local cleanup for a device that went away. Never fails.
	async fn release_device(&self, path: &str) -> Result<()>;

	/// Stops the listen loop and rejects outstanding waiters. Idempotent.
	fn stop(&self);

	fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

	/// Last descriptor snapshot applied by the listen loop.
	fn descriptors(&self) -> Vec<Descriptor>;

	/// Backend version reported by `init`.
	fn version(&self) -> Option<String>;

	/// Whether the backend is older than the configured latest version.
	fn is_outdated(&self) -> bool;
}
