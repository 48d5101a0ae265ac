use anyhow::{Context, Result};
use hwbridge::protocol::Framing;
use hwbridge::{CallInput, ReceiveInput, Session, Transport};
use serde_json::{Value, json};

use super::CommandContext;
use crate::cli::MessageArgs;

fn call_input(args: &MessageArgs) -> Result<CallInput> {
	let data: Value = serde_json::from_str(&args.payload).context("--payload must be a JSON object")?;
	anyhow::ensure!(data.is_object(), "--payload must be a JSON object");
	let mut input = CallInput::new(Session::from(args.session.as_str()), args.name.as_str(), data);
	input.protocol = args.protocol;
	Ok(input)
}

pub async fn call(ctx: &CommandContext, args: &MessageArgs) -> Result<Value> {
	let response = ctx.transport.call(call_input(args)?, ctx.signal()).await?;
	Ok(serde_json::to_value(response)?)
}

pub async fn send(ctx: &CommandContext, args: &MessageArgs) -> Result<Value> {
	ctx.transport.send(call_input(args)?, ctx.signal()).await?;
	Ok(json!({ "sent": args.name }))
}

pub async fn receive(ctx: &CommandContext, session: &str, protocol: Option<Framing>) -> Result<Value> {
	let mut input = ReceiveInput::new(Session::from(session));
	input.protocol = protocol;
	let response = ctx.transport.receive(input, ctx.signal()).await?;
	Ok(serde_json::to_value(response)?)
}
