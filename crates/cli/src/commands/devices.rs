use anyhow::Result;
use hwbridge::{Transport, TransportEvent};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::CommandContext;
use crate::output::CommandResult;

pub fn status(ctx: &CommandContext) -> Result<Value> {
	let transport = &ctx.transport;
	Ok(json!({
		"url": transport.config().url,
		"version": transport.version(),
		"outdated": transport.is_outdated(),
		"protocolMessages": transport.uses_protocol_messages(),
	}))
}

pub async fn enumerate(ctx: &CommandContext) -> Result<Value> {
	let descriptors = ctx.transport.enumerate(ctx.signal()).await?;
	Ok(serde_json::to_value(descriptors)?)
}

/// Prints one envelope per descriptor update until interrupted, `count`
/// updates were seen, or the listen loop fails.
pub async fn listen(ctx: &CommandContext, count: Option<usize>) -> Result<Value> {
	let mut events = ctx.transport.subscribe();
	ctx.transport.listen()?;
	info!(target = "hwbridge", url = %ctx.transport.config().url, "listening for device changes");

	let mut updates = 0usize;
	while count.is_none_or(|limit| updates < limit) {
		let event = tokio::select! {
			_ = ctx.signal.cancelled() => break,
			event = events.recv() => event,
		};
		match event {
			Ok(TransportEvent::Update(diff)) => {
				updates += 1;
				CommandResult::success("listen", serde_json::to_value(&diff)?).print()?;
			}
			Ok(TransportEvent::Error(err)) => return Err(err.into()),
			Err(RecvError::Lagged(skipped)) => warn!(target = "hwbridge", skipped, "listen output fell behind"),
			Err(RecvError::Closed) => break,
		}
	}

	Ok(json!({ "updates": updates }))
}
