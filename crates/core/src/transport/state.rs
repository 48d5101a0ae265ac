//! Owned transport state and its named transitions.
//!
//! Descriptors, listen waiters and the pending acquire/release markers are
//! only ever changed through the methods below. Waiter registration goes
//! through a single vacant-entry check and requires a [`PathLease`], so a
//! second waiter for the same path cannot be created while one is pending.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tokio::sync::{OwnedMutexGuard, oneshot};
use tracing::debug;

use crate::diff::{self, DescriptorDiff};
use crate::error::{ErrorKind, Result, TransportError};
use crate::types::{Descriptor, Session};

/// Exclusive right to arbitrate `path` while listening.
///
/// Held by an acquire or release call from before its waiter is registered
/// until the call returns.
pub(crate) struct PathLease {
	path: String,
	_guard: OwnedMutexGuard<()>,
}

impl PathLease {
	pub(crate) fn new(path: String, guard: OwnedMutexGuard<()>) -> Self {
		Self { path, _guard: guard }
	}

	pub(crate) fn path(&self) -> &str {
		&self.path
	}
}

/// What a waiter expects the next snapshots to show for its path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Expectation {
	Acquire {
		previous: Option<Session>,
		/// Pending-acquire marker: the session the daemon answered with.
		pending: Option<Session>,
	},
	Release {
		session: Session,
		/// Pending-release marker: set once the daemon accepted the release.
		pending: bool,
	},
}

enum Verdict {
	Settle(Result<()>),
	Wait,
}

impl Expectation {
	fn evaluate(&self, descriptor: Option<&Descriptor>) -> Verdict {
		match self {
			Expectation::Acquire { pending: None, .. } | Expectation::Release { pending: false, .. } => Verdict::Wait,
			Expectation::Acquire {
				previous,
				pending: Some(expected),
			} => match descriptor {
				None => Verdict::Settle(Err(ErrorKind::DeviceDisconnectedDuringAction.into())),
				Some(d) if d.session.as_ref() == Some(expected) => Verdict::Settle(Ok(())),
				// snapshot computed before the acquire landed
				Some(d) if d.session == *previous => Verdict::Wait,
				Some(_) => Verdict::Settle(Err(ErrorKind::SessionWrongPrevious.into())),
			},
			Expectation::Release { session, pending: true } => match descriptor {
				Some(d) if d.session.as_ref() == Some(session) => Verdict::Wait,
				_ => Verdict::Settle(Ok(())),
			},
		}
	}
}

struct ListenWaiter {
	ticket: u64,
	expect: Expectation,
	tx: oneshot::Sender<Result<()>>,
}

/// Handle returned on waiter registration.
pub(crate) struct WaiterTicket {
	pub(crate) id: u64,
	pub(crate) rx: oneshot::Receiver<Result<()>>,
}

/// Mutable state of one transport instance.
pub(crate) struct TransportState {
	pub(crate) stopped: bool,
	pub(crate) listening: bool,
	pub(crate) descriptors: Vec<Descriptor>,
	pub(crate) version: Option<String>,
	pub(crate) is_outdated: bool,
	pub(crate) use_protocol_messages: bool,
	waiters: HashMap<String, ListenWaiter>,
	next_ticket: u64,
}

impl Default for TransportState {
	fn default() -> Self {
		Self {
			stopped: true,
			listening: false,
			descriptors: Vec::new(),
			version: None,
			is_outdated: false,
			use_protocol_messages: false,
			waiters: HashMap::new(),
			next_ticket: 0,
		}
	}
}

impl TransportState {
	pub(crate) fn ensure_active(&self) -> Result<()> {
		if self.stopped {
			return Err(ErrorKind::TransportNotInitialized.into());
		}
		Ok(())
	}

	/// Registers the acquire waiter for the leased path.
	pub(crate) fn begin_acquire(&mut self, lease: &PathLease, previous: Option<Session>) -> Result<WaiterTicket> {
		self.register(lease, Expectation::Acquire { previous, pending: None })
	}

	/// Records the session the daemon answered with (pending-acquire marker).
	pub(crate) fn confirm_acquire(&mut self, ticket: u64, path: &str, session: &Session) {
		if let Some(waiter) = self.waiter_mut(ticket, path) {
			if let Expectation::Acquire { pending, .. } = &mut waiter.expect {
				*pending = Some(session.clone());
			}
		}
		self.settle_path(path, true);
	}

	/// Registers the release waiter for the leased path.
	pub(crate) fn begin_release(&mut self, lease: &PathLease, session: Session) -> Result<WaiterTicket> {
		self.register(lease, Expectation::Release { session, pending: false })
	}

	/// Records that the daemon accepted the release (pending-release marker).
	pub(crate) fn confirm_release(&mut self, ticket: u64, path: &str) {
		if let Some(waiter) = self.waiter_mut(ticket, path) {
			if let Expectation::Release { pending, .. } = &mut waiter.expect {
				*pending = true;
			}
		}
		self.settle_path(path, true);
	}

	/// Drops the waiter for `path` if it is still the one issued as `ticket`.
	pub(crate) fn abandon(&mut self, ticket: u64, path: &str) {
		if self.waiters.get(path).is_some_and(|w| w.ticket == ticket) {
			self.waiters.remove(path);
		}
	}

	/// Replaces the descriptor list and settles every waiter whose
	/// expectation the new snapshot satisfies or contradicts.
	pub(crate) fn apply_descriptors(&mut self, next: Vec<Descriptor>) -> Option<DescriptorDiff> {
		if self.stopped {
			return None;
		}
		let change = diff::diff(&self.descriptors, &next);
		self.descriptors = next;

		let paths: Vec<String> = self.waiters.keys().cloned().collect();
		for path in paths {
			self.settle_path(&path, false);
		}

		change.did_update.then_some(change)
	}

	/// Rejects every pending waiter with `error`.
	pub(crate) fn reject_all(&mut self, error: &TransportError) {
		for (path, waiter) in self.waiters.drain() {
			debug!(target = "hwbridge.transport", %path, error = %error, "rejecting listen waiter");
			let _ = waiter.tx.send(Err(error.clone()));
		}
	}

	#[cfg(test)]
	pub(crate) fn pending_waiters(&self) -> usize {
		self.waiters.len()
	}

	fn register(&mut self, lease: &PathLease, expect: Expectation) -> Result<WaiterTicket> {
		let ticket = self.next_ticket;
		match self.waiters.entry(lease.path().to_string()) {
			Entry::Occupied(_) => Err(TransportError::with_message(
				ErrorKind::UnexpectedError,
				format!("listen waiter already pending for {}", lease.path()),
			)),
			Entry::Vacant(slot) => {
				let (tx, rx) = oneshot::channel();
				slot.insert(ListenWaiter { ticket, expect, tx });
				self.next_ticket += 1;
				Ok(WaiterTicket { id: ticket, rx })
			}
		}
	}

	fn waiter_mut(&mut self, ticket: u64, path: &str) -> Option<&mut ListenWaiter> {
		self.waiters.get_mut(path).filter(|w| w.ticket == ticket)
	}

	/// Settles the waiter for `path` against the current descriptors. With
	/// `only_success`, a contradicting snapshot is left for the listen loop:
	/// at confirmation time the descriptors may predate the daemon's answer.
	fn settle_path(&mut self, path: &str, only_success: bool) {
		let Some(waiter) = self.waiters.get(path) else {
			return;
		};
		let descriptor = self.descriptors.iter().find(|d| d.path == path);
		if let Verdict::Settle(result) = waiter.expect.evaluate(descriptor) {
			if only_success && result.is_err() {
				return;
			}
			if let Some(waiter) = self.waiters.remove(path) {
				debug!(target = "hwbridge.transport", %path, ok = result.is_ok(), "listen waiter settled");
				let _ = waiter.tx.send(result);
			}
		}
	}
}
