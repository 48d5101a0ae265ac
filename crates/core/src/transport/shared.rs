//! Plumbing shared by concrete transports.
//!
//! [`TransportCore`] owns the [`TransportState`], the event fan-out, the stop
//! token handed to background loops, the in-flight round trips and the
//! per-path leases. [`TransportCore::schedule_action`] is the single place where an
//! operation is raced against cancellation and its timeout.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Operation;
use super::state::{PathLease, TransportState};
use crate::error::{ErrorKind, Result};
use crate::types::{Descriptor, TransportEvent};

pub(crate) struct TransportCore {
	pub(crate) state: Arc<Mutex<TransportState>>,
	events: broadcast::Sender<TransportEvent>,
	stop: Mutex<CancellationToken>,
	in_flight: Arc<watch::Sender<RoundTrips>>,
	path_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TransportCore {
	pub(crate) fn new(event_capacity: usize) -> Self {
		let (events, _) = broadcast::channel(event_capacity.max(1));
		let (in_flight, _) = watch::channel(RoundTrips::default());
		Self {
			state: Arc::new(Mutex::new(TransportState::default())),
			events,
			stop: Mutex::new(CancellationToken::new()),
			in_flight: Arc::new(in_flight),
			path_locks: Mutex::new(HashMap::new()),
		}
	}

	/// Token cancelled by the next [`stop`](Self::stop).
	pub(crate) fn stop_token(&self) -> CancellationToken {
		self.stop.lock().clone()
	}

	/// Runs `action` until it finishes, `signal` or the stop token fires, or
	/// `timeout` elapses.
	///
	/// Cancellation drops the action future, so any RAII guard it holds
	/// (waiter registrations, in-flight markers, path leases) is released.
	pub(crate) async fn schedule_action<T, F>(
		&self,
		operation: Operation,
		signal: Option<CancellationToken>,
		timeout: Option<Duration>,
		action: F,
	) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let result = self.race(operation, signal, timeout, action).await;
		match &result {
			Err(error) if !operation.declares(error.kind()) => {
				warn!(target = "hwbridge.transport", operation = operation.name(), %error, "undeclared error kind");
			}
			_ => {}
		}
		result
	}

	async fn race<T, F>(&self, operation: Operation, signal: Option<CancellationToken>, timeout: Option<Duration>, action: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let stop = self.stop_token();
		let signal = signal.unwrap_or_default();
		if signal.is_cancelled() || stop.is_cancelled() {
			return Err(ErrorKind::Aborted.into());
		}

		let bounded = async move {
			match timeout {
				Some(limit) => match tokio::time::timeout(limit, action).await {
					Ok(result) => result,
					Err(_) => {
						debug!(
							target = "hwbridge.transport",
							operation = operation.name(),
							timeout_ms = limit.as_millis() as u64,
							"action timed out"
						);
						Err(ErrorKind::Timeout.into())
					}
				},
				None => action.await,
			}
		};

		tokio::select! {
			biased;
			_ = signal.cancelled() => Err(ErrorKind::Aborted.into()),
			_ = stop.cancelled() => Err(ErrorKind::Aborted.into()),
			result = bounded => result,
		}
	}

	/// Marks one acquire/release round trip as in flight until the guard drops.
	pub(crate) fn begin_round_trip(&self) -> InFlightGuard {
		let mut id = 0;
		self.in_flight.send_modify(|trips| id = trips.begin());
		InFlightGuard {
			trips: Arc::clone(&self.in_flight),
			id,
		}
	}

	pub(crate) fn watch_in_flight(&self) -> watch::Receiver<RoundTrips> {
		self.in_flight.subscribe()
	}

	/// Waits for exclusive arbitration rights on `path`.
	pub(crate) async fn lease(&self, path: &str) -> PathLease {
		let lock = {
			let mut locks = self.path_locks.lock();
			Arc::clone(locks.entry(path.to_string()).or_default())
		};
		let guard = lock.lock_owned().await;
		PathLease::new(path.to_string(), guard)
	}

	/// Drops the lease slot for `path` unless a caller holds or awaits it.
	pub(crate) fn forget_path(&self, path: &str) {
		let mut locks = self.path_locks.lock();
		if locks.get(path).is_some_and(|lock| Arc::strong_count(lock) == 1) {
			locks.remove(path);
		}
	}

	pub(crate) fn emit(&self, event: TransportEvent) {
		// no subscribers is fine
		let _ = self.events.send(event);
	}

	pub(crate) fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
		self.events.subscribe()
	}

	pub(crate) fn descriptors(&self) -> Vec<Descriptor> {
		self.state.lock().descriptors.clone()
	}

	/// Stops the instance: waiters are rejected with `aborted`, the current
	/// stop token is cancelled and replaced for a later `init`.
	pub(crate) fn stop(&self) {
		{
			let mut state = self.state.lock();
			if !state.stopped {
				debug!(target = "hwbridge.transport", listening = state.listening, "stopping transport");
			}
			state.stopped = true;
			state.listening = false;
			state.reject_all(&ErrorKind::Aborted.into());
		}
		let token = std::mem::take(&mut *self.stop.lock());
		token.cancel();
	}
}

/// Acquire/release round trips in flight, numbered in start order.
///
/// The listen loop takes a [`cutoff`](Self::cutoff) when an answer arrives and
/// waits for [`drained_before`](Self::drained_before). Round trips started
/// later do not hold it back, so overlapping requests cannot starve it.
#[derive(Debug, Default)]
pub(crate) struct RoundTrips {
	next: u64,
	active: BTreeSet<u64>,
}

impl RoundTrips {
	fn begin(&mut self) -> u64 {
		let id = self.next;
		self.next += 1;
		self.active.insert(id);
		id
	}

	/// Id the next round trip will get.
	pub(crate) fn cutoff(&self) -> u64 {
		self.next
	}

	/// Whether every round trip numbered below `cutoff` has finished.
	pub(crate) fn drained_before(&self, cutoff: u64) -> bool {
		self.active.first().is_none_or(|oldest| *oldest >= cutoff)
	}

	pub(crate) fn len(&self) -> usize {
		self.active.len()
	}
}

/// Ends its round trip on drop.
pub(crate) struct InFlightGuard {
	trips: Arc<watch::Sender<RoundTrips>>,
	id: u64,
}

impl Drop for InFlightGuard {
	fn drop(&mut self) {
		self.trips.send_modify(|trips| {
			trips.active.remove(&self.id);
		});
		trace!(target = "hwbridge.transport", in_flight = self.trips.borrow().len(), "round trip finished");
	}
}

/// Abandons a listen waiter on drop; a no-op once the waiter was settled.
pub(crate) struct WaiterGuard {
	state: Arc<Mutex<TransportState>>,
	ticket: u64,
	path: String,
}

impl WaiterGuard {
	pub(crate) fn new(state: Arc<Mutex<TransportState>>, ticket: u64, path: &str) -> Self {
		Self {
			state,
			ticket,
			path: path.to_string(),
		}
	}
}

impl Drop for WaiterGuard {
	fn drop(&mut self) {
		self.state.lock().abandon(self.ticket, &self.path);
	}
}
