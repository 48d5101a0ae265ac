use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hwbridge::DEFAULT_URL;
use hwbridge::protocol::Framing;

#[derive(Parser, Debug)]
#[command(name = "hwbridge")]
#[command(about = "Talk to a hardware wallet through the local bridge daemon")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Bridge daemon URL
	#[arg(long, global = true, env = "HWBRIDGE_URL", default_value = DEFAULT_URL)]
	pub url: String,

	/// Newest daemon version; older daemons are reported as outdated
	#[arg(long, global = true, value_name = "VERSION")]
	pub latest_version: Option<String>,

	/// Message schema (JSON) used to encode and decode device messages
	#[arg(long, global = true, value_name = "FILE", env = "HWBRIDGE_SCHEMA")]
	pub schema: Option<PathBuf>,

	/// Timeout for control operations in milliseconds
	#[arg(long, global = true, value_name = "MS")]
	pub timeout_ms: Option<u64>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Show daemon version and capabilities
	Status,

	/// List connected devices
	#[command(alias = "ls")]
	Enumerate,

	/// Follow device changes until interrupted
	Listen {
		/// Exit after this many updates
		#[arg(long)]
		count: Option<usize>,
	},

	/// Acquire a session on a device
	Acquire {
		path: String,
		/// Session currently held on the device, if any
		#[arg(long)]
		previous: Option<String>,
	},

	/// Release a session
	Release {
		session: String,
		/// Device path the session belongs to
		#[arg(long, default_value = "")]
		path: String,
	},

	/// Send a message and wait for the response
	Call(MessageArgs),

	/// Send a message without waiting for a response
	Send(MessageArgs),

	/// Read the next message queued for a session
	Receive {
		session: String,
		/// Framing variant (bridge or v1)
		#[arg(long)]
		protocol: Option<Framing>,
	},
}

#[derive(clap::Args, Debug)]
pub struct MessageArgs {
	pub session: String,
	/// Message name from the schema
	pub name: String,
	/// Message fields as a JSON object
	#[arg(long, default_value = "{}")]
	pub payload: String,
	/// Framing variant (bridge or v1); ignored by daemons without protocol messages
	#[arg(long)]
	pub protocol: Option<Framing>,
}

impl Commands {
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Status => "status",
			Commands::Enumerate => "enumerate",
			Commands::Listen { .. } => "listen",
			Commands::Acquire { .. } => "acquire",
			Commands::Release { .. } => "release",
			Commands::Call(_) => "call",
			Commands::Send(_) => "send",
			Commands::Receive { .. } => "receive",
		}
	}
}
