//! Bridge transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Address the bridge daemon listens on by default.
pub const DEFAULT_URL: &str = "http://127.0.0.1:21325";

/// Tunables for [`BridgeTransport`](super::BridgeTransport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
	/// Daemon base URL, without a trailing slash.
	pub url: String,
	/// Newest daemon version known to the application; older daemons are
	/// flagged as outdated by `init`.
	pub latest_version: Option<String>,
	/// Timeout for `init`, `enumerate`, `acquire`, `release` and `send`.
	pub action_timeout_ms: u64,
	/// A listen request failing faster than this stops the loop for good.
	pub listen_fault_threshold_ms: u64,
	/// Pause before retrying a listen request that failed slowly.
	pub listen_retry_delay_ms: u64,
	/// Buffered events per subscriber before lagging ones drop the oldest.
	pub event_capacity: usize,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self {
			url: DEFAULT_URL.to_string(),
			latest_version: None,
			action_timeout_ms: 10_000,
			listen_fault_threshold_ms: 1_100,
			listen_retry_delay_ms: 1_000,
			event_capacity: 64,
		}
	}
}

impl BridgeConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into().trim_end_matches('/').to_string(),
			..Self::default()
		}
	}

	pub fn with_latest_version(mut self, version: impl Into<String>) -> Self {
		self.latest_version = Some(version.into());
		self
	}

	pub fn action_timeout(&self) -> Duration {
		Duration::from_millis(self.action_timeout_ms)
	}

	pub fn listen_fault_threshold(&self) -> Duration {
		Duration::from_millis(self.listen_fault_threshold_ms)
	}

	pub fn listen_retry_delay(&self) -> Duration {
		Duration::from_millis(self.listen_retry_delay_ms)
	}
}
