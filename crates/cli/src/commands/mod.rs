mod devices;
mod message;
mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use hwbridge::protocol::MessageSchema;
use hwbridge::{BridgeConfig, BridgeTransport, Transport};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::{Cli, Commands};

/// Everything a command needs: an initialized transport and the Ctrl-C token.
pub struct CommandContext {
	pub transport: BridgeTransport,
	pub signal: CancellationToken,
}

impl CommandContext {
	pub fn new(cli: &Cli) -> Result<Self> {
		let schema = match &cli.schema {
			Some(path) => {
				let text = std::fs::read_to_string(path).with_context(|| format!("failed to read schema {}", path.display()))?;
				MessageSchema::from_json(&text).with_context(|| format!("invalid schema {}", path.display()))?
			}
			None => MessageSchema::default(),
		};

		let mut config = BridgeConfig::new(&cli.url);
		config.latest_version = cli.latest_version.clone();
		if let Some(timeout_ms) = cli.timeout_ms {
			config.action_timeout_ms = timeout_ms;
		}
		debug!(target = "hwbridge", url = %config.url, messages = schema.messages().len(), "creating transport");

		let signal = CancellationToken::new();
		tokio::spawn({
			let signal = signal.clone();
			async move {
				if tokio::signal::ctrl_c().await.is_ok() {
					signal.cancel();
				}
			}
		});

		Ok(Self {
			transport: BridgeTransport::new(config, Arc::new(schema))?,
			signal,
		})
	}

	pub fn signal(&self) -> Option<CancellationToken> {
		Some(self.signal.clone())
	}
}

pub async fn dispatch(cli: &Cli) -> Result<Value> {
	let ctx = CommandContext::new(cli)?;
	ctx.transport.init(ctx.signal()).await?;

	let result = match &cli.command {
		Commands::Status => devices::status(&ctx),
		Commands::Enumerate => devices::enumerate(&ctx).await,
		Commands::Listen { count } => devices::listen(&ctx, *count).await,
		Commands::Acquire { path, previous } => session::acquire(&ctx, path, previous.as_deref()).await,
		Commands::Release { session, path } => session::release(&ctx, path, session).await,
		Commands::Call(args) => message::call(&ctx, args).await,
		Commands::Send(args) => message::send(&ctx, args).await,
		Commands::Receive { session, protocol } => message::receive(&ctx, session, *protocol).await,
	};

	ctx.transport.stop();
	result
}
