//! JSON result envelope printed for every command.

use hwbridge::TransportError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
	pub ok: bool,
	pub command: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandError {
	/// Transport error kind, or `invalid-input` for problems caught before
	/// the daemon was contacted.
	pub kind: String,
	pub message: String,
	/// Set for arbitration outcomes worth retrying (lost race, busy session).
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub recoverable: bool,
}

impl CommandError {
	pub fn invalid_input(err: &anyhow::Error) -> Self {
		Self {
			kind: "invalid-input".to_string(),
			message: format!("{err:#}"),
			recoverable: false,
		}
	}
}

impl From<&TransportError> for CommandError {
	fn from(err: &TransportError) -> Self {
		let kind = serde_json::to_value(err.kind())
			.ok()
			.and_then(|v| v.as_str().map(str::to_string))
			.unwrap_or_else(|| "unexpected-error".to_string());
		Self {
			kind,
			message: err.to_string(),
			recoverable: err.kind().is_recoverable(),
		}
	}
}

impl CommandResult {
	pub fn success(command: &'static str, data: Value) -> Self {
		Self {
			ok: true,
			command,
			data: Some(data),
			error: None,
			duration_ms: None,
		}
	}

	pub fn failure(command: &'static str, error: CommandError) -> Self {
		Self {
			ok: false,
			command,
			data: None,
			error: Some(error),
			duration_ms: None,
		}
	}

	pub fn duration_ms(mut self, duration_ms: u64) -> Self {
		self.duration_ms = Some(duration_ms);
		self
	}

	/// Prints the envelope as one line on stdout.
	pub fn print(&self) -> anyhow::Result<()> {
		println!("{}", serde_json::to_string(self)?);
		Ok(())
	}
}
