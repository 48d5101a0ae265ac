use anyhow::Result;
use hwbridge::{AcquireInput, ReleaseInput, Session, Transport};
use serde_json::{Value, json};

use super::CommandContext;

pub async fn acquire(ctx: &CommandContext, path: &str, previous: Option<&str>) -> Result<Value> {
	let input = AcquireInput {
		path: path.to_string(),
		previous: previous.map(Session::from),
	};
	let session = ctx.transport.acquire(input, ctx.signal()).await?;
	Ok(json!({ "path": path, "session": session }))
}

pub async fn release(ctx: &CommandContext, path: &str, session: &str) -> Result<Value> {
	let input = ReleaseInput {
		path: path.to_string(),
		session: Session::from(session),
		on_close: false,
	};
	ctx.transport.release(input, ctx.signal()).await?;
	Ok(json!({ "session": session, "released": true }))
}
