//! The `/listen` long-poll loop.
//!
//! Each iteration posts the last applied descriptor list; the daemon holds
//! the request until its own list differs and then answers with the new one.
//! A request that fails faster than the fault threshold means the daemon is
//! gone or refusing us, which ends the loop and is reported as a
//! [`TransportEvent::Error`]. Slower failures are retried after a pause.
//!
//! A snapshot is applied only after every acquire/release round trip that
//! started before it arrived has finished: a listen answer computed before
//! such a request landed must not be taken as the daemon's verdict on it.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::BridgeInner;
use super::http::{self, Endpoint, RequestBody};
use crate::types::TransportEvent;

pub(crate) async fn run(inner: Arc<BridgeInner>, stop: CancellationToken) {
	let threshold = inner.config.listen_fault_threshold();
	let retry_delay = inner.config.listen_retry_delay();
	let mut in_flight = inner.core.watch_in_flight();

	while !stop.is_cancelled() {
		let known = serde_json::to_value(inner.core.descriptors()).unwrap_or_else(|_| Value::Array(Vec::new()));
		let started = Instant::now();

		let response = tokio::select! {
			biased;
			_ = stop.cancelled() => break,
			response = inner.http.post(Endpoint::Listen, None, RequestBody::Json(known)) => {
				response.and_then(|value| http::parse_descriptors(Endpoint::Listen, value))
			}
		};

		let cutoff = in_flight.borrow().cutoff();
		let next = match response {
			Ok(next) => next,
			Err(error) => {
				let elapsed = started.elapsed();
				if elapsed <= threshold {
					warn!(
						target = "hwbridge.listen",
						error = %error,
						elapsed_ms = elapsed.as_millis() as u64,
						"listen failed quickly, stopping"
					);
					{
						let mut state = inner.core.state.lock();
						state.listening = false;
						state.reject_all(&error);
					}
					inner.core.emit(TransportEvent::Error(error));
					return;
				}
				debug!(target = "hwbridge.listen", error = %error, "listen failed, retrying");
				tokio::select! {
					biased;
					_ = stop.cancelled() => break,
					_ = tokio::time::sleep(retry_delay) => continue,
				}
			}
		};

		tokio::select! {
			biased;
			_ = stop.cancelled() => break,
			_ = async {
				// the returned borrow must not outlive this arm
				let _ = in_flight.wait_for(|trips| trips.drained_before(cutoff)).await;
			} => {}
		}
		if stop.is_cancelled() {
			break;
		}

		let change = inner.core.state.lock().apply_descriptors(next);
		match change {
			Some(change) => {
				debug!(
					target = "hwbridge.listen",
					connected = change.connected.len(),
					disconnected = change.disconnected.len(),
					changed = change.changed_sessions.len(),
					"descriptors updated"
				);
				inner.core.emit(TransportEvent::Update(change));
			}
			None => trace!(target = "hwbridge.listen", "listen returned without changes"),
		}
	}
	debug!(target = "hwbridge.listen", "listen loop finished");
}
