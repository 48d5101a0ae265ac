//! Transport backed by the bridge daemon's HTTP API.
//!
//! The daemon owns the USB devices and arbitrates between every client on
//! the machine. This module keeps the local view consistent with it:
//!
//! * `init` probes `POST /` for the daemon version and whether it accepts
//!   protocol message envelopes.
//! * `listen` spawns a long-poll loop over `POST /listen` (see [`listen`]).
//! * `acquire` and `release` register a listen waiter before their request
//!   and return only once the loop has observed the effect, so callers never
//!   see a descriptor list that contradicts a session they were just handed.
//! * `call`, `send` and `receive` frame messages with the caller's schema
//!   and pass daemon arbitration errors (`other call in progress`) through.

mod config;
mod http;
mod listen;

use std::sync::Arc;

use async_trait::async_trait;
use hwbridge_protocol::{BridgeProtocolMessage, DecodedMessage, Framing, MessageSchema};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use self::config::{BridgeConfig, DEFAULT_URL};
use self::http::{BridgeHttp, Endpoint, RequestBody};
use crate::error::{ErrorKind, Result, TransportError};
use crate::transport::{Operation, Transport};
use crate::transport::shared::{TransportCore, WaiterGuard};
use crate::transport::state::{PathLease, TransportState, WaiterTicket};
use crate::types::{AcquireInput, CallInput, Descriptor, ReceiveInput, ReleaseInput, Session, TransportEvent};

/// [`Transport`] talking to a bridge daemon.
///
/// Cloning is cheap; clones share the same state and listen loop.
#[derive(Clone)]
pub struct BridgeTransport {
	inner: Arc<BridgeInner>,
}

pub(crate) struct BridgeInner {
	config: BridgeConfig,
	http: BridgeHttp,
	schema: Arc<MessageSchema>,
	core: TransportCore,
}

/// A registered listen waiter together with the lease that guards it.
///
/// Field order is drop order: the waiter is abandoned before the lease is
/// released, so the next caller on the path always finds the slot vacant.
struct Arbitration {
	ticket: WaiterTicket,
	_guard: WaiterGuard,
	_lease: PathLease,
}

impl Arbitration {
	fn id(&self) -> u64 {
		self.ticket.id
	}

	/// Waits for the listen loop (or `stop`) to settle the waiter.
	async fn settled(&mut self) -> Result<()> {
		match (&mut self.ticket.rx).await {
			Ok(result) => result,
			Err(_) => Err(ErrorKind::Aborted.into()),
		}
	}
}

impl BridgeTransport {
	/// Creates an inert transport. Call [`Transport::init`] before use.
	pub fn new(config: BridgeConfig, schema: Arc<MessageSchema>) -> Result<Self> {
		let http = BridgeHttp::new(&config.url)?;
		let core = TransportCore::new(config.event_capacity);
		Ok(Self {
			inner: Arc::new(BridgeInner {
				config,
				http,
				schema,
				core,
			}),
		})
	}

	pub fn config(&self) -> &BridgeConfig {
		&self.inner.config
	}

	/// Whether the daemon accepts protocol message envelopes.
	pub fn uses_protocol_messages(&self) -> bool {
		self.inner.core.state.lock().use_protocol_messages
	}
}

impl BridgeInner {
	fn ensure_active(&self) -> Result<()> {
		self.core.state.lock().ensure_active()
	}

	/// Registers a listen waiter for `path` when the loop is running.
	async fn arbitrate<F>(&self, path: &str, begin: F) -> Result<Option<Arbitration>>
	where
		F: FnOnce(&mut TransportState, &PathLease) -> Result<WaiterTicket>,
	{
		if !self.core.state.lock().listening {
			return Ok(None);
		}
		let lease = self.core.lease(path).await;
		let ticket = {
			let mut state = self.core.state.lock();
			if !state.listening {
				return Ok(None);
			}
			begin(&mut *state, &lease)?
		};
		let guard = WaiterGuard::new(Arc::clone(&self.core.state), ticket.id, path);
		Ok(Some(Arbitration {
			ticket,
			_guard: guard,
			_lease: lease,
		}))
	}

	/// Framing for a request, and whether it travels in a JSON envelope.
	///
	/// Daemons without protocol messages only understand the legacy variant,
	/// whatever the caller asked for.
	fn wire_format(&self, requested: Option<Framing>) -> (Framing, bool) {
		if self.core.state.lock().use_protocol_messages {
			(requested.unwrap_or(Framing::Versioned), true)
		} else {
			(Framing::Legacy, false)
		}
	}

	fn request_body(frame: &[u8], framing: Framing, enveloped: bool) -> Result<RequestBody> {
		if !enveloped {
			return Ok(RequestBody::Text(BridgeProtocolMessage::new(frame, None).data));
		}
		let envelope = BridgeProtocolMessage::new(frame, Some(framing));
		serde_json::to_value(&envelope)
			.map(RequestBody::Json)
			.map_err(|e| TransportError::with_message(ErrorKind::UnexpectedError, e.to_string()))
	}

	async fn exchange(&self, endpoint: Endpoint, session: &Session, frame: &[u8], framing: Framing, enveloped: bool) -> Result<serde_json::Value> {
		let body = Self::request_body(frame, framing, enveloped)?;
		self.http.post(endpoint, Some(session.as_str()), body).await
	}

	fn decode_response(&self, endpoint: Endpoint, value: serde_json::Value, framing: Framing) -> Result<DecodedMessage> {
		let message = http::parse_message(endpoint, value)?;
		let framing = message.protocol.unwrap_or(framing);
		let frame = message.frame()?;
		Ok(hwbridge_protocol::decode(&self.schema, framing, &frame)?)
	}
}

#[async_trait]
impl Transport for BridgeTransport {
	fn name(&self) -> &'static str {
		"BridgeTransport"
	}

	async fn init(&self, signal: Option<CancellationToken>) -> Result<()> {
		let inner = &self.inner;
		if !inner.core.state.lock().stopped {
			return Ok(());
		}
		inner
			.core
			.schedule_action(Operation::Init, signal, Some(inner.config.action_timeout()), async {
				let info = http::parse_info(inner.http.post(Endpoint::Info, None, RequestBody::Empty).await?)?;
				let is_outdated = inner
					.config
					.latest_version
					.as_deref()
					.is_some_and(|latest| is_newer(latest, &info.version));
				if is_outdated {
					warn!(target = "hwbridge.bridge", version = %info.version, "bridge daemon is outdated");
				}
				debug!(
					target = "hwbridge.bridge",
					version = %info.version,
					protocol_messages = info.protocol_messages,
					"bridge initialized"
				);

				let mut state = inner.core.state.lock();
				state.version = Some(info.version);
				state.is_outdated = is_outdated;
				state.use_protocol_messages = info.protocol_messages;
				state.stopped = false;
				Ok(())
			})
			.await
	}

	async fn enumerate(&self, signal: Option<CancellationToken>) -> Result<Vec<Descriptor>> {
		let inner = &self.inner;
		inner.ensure_active()?;
		inner
			.core
			.schedule_action(Operation::Enumerate, signal, Some(inner.config.action_timeout()), async {
				let value = inner.http.post(Endpoint::Enumerate, None, RequestBody::Empty).await?;
				let descriptors = http::parse_descriptors(Endpoint::Enumerate, value)?;

				// the listen loop owns the snapshot while it runs
				let change = {
					let mut state = inner.core.state.lock();
					if state.listening {
						None
					} else {
						state.apply_descriptors(descriptors.clone())
					}
				};
				if let Some(change) = change {
					inner.core.emit(TransportEvent::Update(change));
				}
				Ok(descriptors)
			})
			.await
	}

	fn listen(&self) -> Result<()> {
		let handle = tokio::runtime::Handle::try_current()
			.map_err(|e| TransportError::with_message(ErrorKind::UnexpectedError, format!("listen needs a tokio runtime: {e}")))?;
		let stop = self.inner.core.stop_token();
		{
			let mut state = self.inner.core.state.lock();
			state.ensure_active()?;
			if state.listening {
				return Err(ErrorKind::AlreadyListening.into());
			}
			state.listening = true;
		}
		debug!(target = "hwbridge.bridge", "starting listen loop");
		handle.spawn(listen::run(Arc::clone(&self.inner), stop));
		Ok(())
	}

	async fn acquire(&self, input: AcquireInput, signal: Option<CancellationToken>) -> Result<Session> {
		let inner = &self.inner;
		inner.ensure_active()?;
		inner
			.core
			.schedule_action(Operation::Acquire, signal, Some(inner.config.action_timeout()), async {
				let previous = input.previous.as_ref().map_or("null", Session::as_str);
				let params = format!("{}/{}", input.path, previous);

				let mut arbitration = inner
					.arbitrate(&input.path, |state, lease| state.begin_acquire(lease, input.previous.clone()))
					.await?;
				let round_trip = inner.core.begin_round_trip();
				let session = inner
					.http
					.post(Endpoint::Acquire, Some(&params), RequestBody::Empty)
					.await
					.and_then(http::parse_session)
					.inspect_err(|e| debug!(target = "hwbridge.bridge", path = %input.path, error = %e, "acquire rejected"))?;

				if let Some(arbitration) = arbitration.as_mut() {
					inner.core.state.lock().confirm_acquire(arbitration.id(), &input.path, &session);
					drop(round_trip);
					arbitration.settled().await?;
				}
				debug!(target = "hwbridge.bridge", path = %input.path, %session, "acquired");
				Ok(session)
			})
			.await
	}

	async fn release(&self, input: ReleaseInput, signal: Option<CancellationToken>) -> Result<()> {
		let inner = &self.inner;
		inner.ensure_active()?;

		if input.on_close {
			let background = Arc::clone(inner);
			tokio::spawn(async move {
				let request = background.http.post(Endpoint::Release, Some(input.session.as_str()), RequestBody::Empty);
				match tokio::time::timeout(background.config.action_timeout(), request).await {
					Ok(Ok(_)) => debug!(target = "hwbridge.bridge", session = %input.session, "released on close"),
					Ok(Err(error)) => debug!(target = "hwbridge.bridge", session = %input.session, %error, "release on close failed"),
					Err(_) => debug!(target = "hwbridge.bridge", session = %input.session, "release on close timed out"),
				}
			});
			return Ok(());
		}

		inner
			.core
			.schedule_action(Operation::Release, signal, Some(inner.config.action_timeout()), async {
				let mut arbitration = inner
					.arbitrate(&input.path, |state, lease| state.begin_release(lease, input.session.clone()))
					.await?;
				let round_trip = inner.core.begin_round_trip();
				inner
					.http
					.post(Endpoint::Release, Some(input.session.as_str()), RequestBody::Empty)
					.await
					.inspect_err(|e| debug!(target = "hwbridge.bridge", session = %input.session, error = %e, "release rejected"))?;

				if let Some(arbitration) = arbitration.as_mut() {
					inner.core.state.lock().confirm_release(arbitration.id(), &input.path);
					drop(round_trip);
					arbitration.settled().await?;
				}
				debug!(target = "hwbridge.bridge", path = %input.path, session = %input.session, "released");
				Ok(())
			})
			.await
	}

	async fn call(&self, input: CallInput, signal: Option<CancellationToken>) -> Result<DecodedMessage> {
		let inner = &self.inner;
		inner.ensure_active()?;
		let (framing, enveloped) = inner.wire_format(input.protocol);
		inner
			.core
			.schedule_action(Operation::Call, signal, None, async {
				let frame = hwbridge_protocol::encode(&inner.schema, framing, &input.name, &input.data)?;
				let value = inner.exchange(Endpoint::Call, &input.session, &frame, framing, enveloped).await?;
				inner.decode_response(Endpoint::Call, value, framing)
			})
			.await
	}

	async fn send(&self, input: CallInput, signal: Option<CancellationToken>) -> Result<()> {
		let inner = &self.inner;
		inner.ensure_active()?;
		let (framing, enveloped) = inner.wire_format(input.protocol);
		inner
			.core
			.schedule_action(Operation::Send, signal, Some(inner.config.action_timeout()), async {
				let frame = hwbridge_protocol::encode(&inner.schema, framing, &input.name, &input.data)?;
				inner.exchange(Endpoint::Post, &input.session, &frame, framing, enveloped).await?;
				Ok(())
			})
			.await
	}

	async fn receive(&self, input: ReceiveInput, signal: Option<CancellationToken>) -> Result<DecodedMessage> {
		let inner = &self.inner;
		inner.ensure_active()?;
		let (framing, enveloped) = inner.wire_format(input.protocol);
		inner
			.core
			.schedule_action(Operation::Receive, signal, None, async {
				let value = inner.exchange(Endpoint::Read, &input.session, &[], framing, enveloped).await?;
				inner.decode_response(Endpoint::Read, value, framing)
			})
			.await
	}

	async fn release_device(&self, path: &str) -> Result<()> {
		self.inner.core.forget_path(path);
		Ok(())
	}

	fn stop(&self) {
		self.inner.core.stop();
	}

	fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
		self.inner.core.subscribe()
	}

	fn descriptors(&self) -> Vec<Descriptor> {
		self.inner.core.descriptors()
	}

	fn version(&self) -> Option<String> {
		self.inner.core.state.lock().version.clone()
	}

	fn is_outdated(&self) -> bool {
		self.inner.core.state.lock().is_outdated
	}
}

/// Dotted numeric comparison: is `candidate` strictly newer than `current`?
/// Missing or non-numeric components count as zero.
fn is_newer(candidate: &str, current: &str) -> bool {
	let parse = |version: &str| -> Vec<u64> { version.split('.').map(|part| part.trim().parse().unwrap_or(0)).collect() };
	let (candidate, current) = (parse(candidate), parse(current));
	let len = candidate.len().max(current.len());
	for i in 0..len {
		let a = candidate.get(i).copied().unwrap_or(0);
		let b = current.get(i).copied().unwrap_or(0);
		if a != b {
			return a > b;
		}
	}
	false
}
