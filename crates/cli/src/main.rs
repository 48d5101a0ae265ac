use std::time::Instant;

use clap::Parser;
use hwbridge::TransportError;
use hwbridge_cli::cli::Cli;
use hwbridge_cli::output::{CommandError, CommandResult};
use hwbridge_cli::{commands, logging};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let command = cli.command.name();
	let started = Instant::now();
	let result = commands::dispatch(&cli).await;
	let duration_ms = started.elapsed().as_millis() as u64;

	let (envelope, failed) = match result {
		Ok(data) => (CommandResult::success(command, data), false),
		Err(err) => {
			error!(target = "hwbridge", command, error = %format!("{err:#}"), "command failed");
			let error = match err.downcast_ref::<TransportError>() {
				Some(transport_error) => CommandError::from(transport_error),
				None => CommandError::invalid_input(&err),
			};
			(CommandResult::failure(command, error), true)
		}
	};

	if let Err(err) = envelope.duration_ms(duration_ms).print() {
		error!(target = "hwbridge", error = %err, "failed to write output");
		std::process::exit(1);
	}
	if failed {
		std::process::exit(1);
	}
}
