//! HTTP plumbing for the bridge daemon API.
//!
//! Every endpoint is a `POST {url}{endpoint}[/{params}]` without a
//! content-type header. Error bodies look like `{"error": "..."}` and are
//! mapped through the endpoint's declared error set; success bodies are
//! checked against the shape each endpoint promises.

use std::time::Instant;

use hwbridge_protocol::BridgeProtocolMessage;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{ErrorKind, Result, TransportError};
use crate::types::{Descriptor, Session};

/// Daemon endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
	Info,
	Enumerate,
	Listen,
	Acquire,
	Release,
	Call,
	Post,
	Read,
}

impl Endpoint {
	pub(crate) fn path(self) -> &'static str {
		match self {
			Endpoint::Info => "/",
			Endpoint::Enumerate => "/enumerate",
			Endpoint::Listen => "/listen",
			Endpoint::Acquire => "/acquire",
			Endpoint::Release => "/release",
			Endpoint::Call => "/call",
			Endpoint::Post => "/post",
			Endpoint::Read => "/read",
		}
	}

	/// Error kinds this endpoint is known to report.
	pub(crate) fn expected_errors(self) -> &'static [ErrorKind] {
		match self {
			Endpoint::Info | Endpoint::Enumerate | Endpoint::Listen => &[],
			Endpoint::Acquire => &[
				ErrorKind::SessionWrongPrevious,
				ErrorKind::DeviceNotFound,
				ErrorKind::InterfaceUnableToOpenDevice,
				ErrorKind::DeviceDisconnectedDuringAction,
			],
			Endpoint::Call | Endpoint::Post | Endpoint::Read => &[
				ErrorKind::SessionNotFound,
				ErrorKind::DeviceDisconnectedDuringAction,
				ErrorKind::OtherCallInProgress,
				ErrorKind::MalformedProtocol,
			],
			Endpoint::Release => &[ErrorKind::SessionNotFound, ErrorKind::DeviceDisconnectedDuringAction],
		}
	}
}

/// Request body variants the daemon accepts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RequestBody {
	Empty,
	/// Serialized by hand so no content-type header is attached.
	Json(Value),
	Text(String),
}

/// `POST /` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BridgeInfo {
	pub(crate) version: String,
	#[serde(default)]
	pub(crate) protocol_messages: bool,
}

#[derive(Deserialize)]
struct AcquireResponse {
	session: Session,
}

#[derive(Deserialize)]
struct ErrorResponse {
	error: String,
}

pub(crate) struct BridgeHttp {
	client: reqwest::Client,
	url: String,
}

impl BridgeHttp {
	pub(crate) fn new(url: &str) -> Result<Self> {
		let client = reqwest::Client::builder()
			.build()
			.map_err(|e| TransportError::with_message(ErrorKind::HttpError, format!("failed to create HTTP client: {e}")))?;
		Ok(Self {
			client,
			url: url.trim_end_matches('/').to_string(),
		})
	}

	pub(crate) async fn post(&self, endpoint: Endpoint, params: Option<&str>, body: RequestBody) -> Result<Value> {
		let url = match params {
			Some(params) => format!("{}{}/{}", self.url, endpoint.path(), params),
			None => format!("{}{}", self.url, endpoint.path()),
		};
		let started = Instant::now();

		let request = self.client.post(&url);
		let request = match body {
			RequestBody::Empty => request,
			RequestBody::Json(value) => request.body(value.to_string()),
			RequestBody::Text(text) => request.body(text),
		};

		let response = request.send().await.map_err(|e| {
			debug!(target = "hwbridge.http", endpoint = endpoint.path(), error = %e, "request failed");
			TransportError::with_message(ErrorKind::HttpError, e.to_string())
		})?;
		let status = response.status();
		let text = response
			.text()
			.await
			.map_err(|e| TransportError::with_message(ErrorKind::HttpError, e.to_string()))?;

		trace!(
			target = "hwbridge.http",
			endpoint = endpoint.path(),
			status = status.as_u16(),
			elapsed_ms = started.elapsed().as_millis() as u64,
			"response received"
		);

		if !status.is_success() {
			return Err(daemon_error(endpoint, &text));
		}
		parse_body(&text)
	}
}

/// Maps a non-2xx body. Bodies that are not `{"error": "..."}` keep their text.
fn daemon_error(endpoint: Endpoint, text: &str) -> TransportError {
	match serde_json::from_str::<ErrorResponse>(text) {
		Ok(body) => TransportError::from_daemon(&body.error, endpoint.expected_errors()),
		Err(_) => TransportError::with_message(ErrorKind::UnexpectedError, text.trim()),
	}
}

/// Parses a 2xx body. Only bodies that look like JSON are parsed as such:
/// a bare hex frame such as `0037` would otherwise read as a number.
fn parse_body(text: &str) -> Result<Value> {
	let trimmed = text.trim();
	if trimmed.is_empty() {
		return Ok(Value::Null);
	}
	if trimmed.starts_with(['{', '[', '"']) {
		return serde_json::from_str(trimmed).map_err(|e| TransportError::with_message(ErrorKind::WrongResultType, e.to_string()));
	}
	Ok(Value::String(trimmed.to_string()))
}

fn typed<T: DeserializeOwned>(endpoint: Endpoint, value: Value) -> Result<T> {
	serde_json::from_value(value)
		.map_err(|e| TransportError::with_message(ErrorKind::WrongResultType, format!("{}: {e}", endpoint.path())))
}

pub(crate) fn parse_info(value: Value) -> Result<BridgeInfo> {
	typed(Endpoint::Info, value)
}

pub(crate) fn parse_descriptors(endpoint: Endpoint, value: Value) -> Result<Vec<Descriptor>> {
	typed(endpoint, value)
}

pub(crate) fn parse_session(value: Value) -> Result<Session> {
	typed::<AcquireResponse>(Endpoint::Acquire, value).map(|r| r.session)
}

pub(crate) fn parse_message(endpoint: Endpoint, value: Value) -> Result<BridgeProtocolMessage> {
	BridgeProtocolMessage::from_value(value)
		.ok_or_else(|| TransportError::with_message(ErrorKind::WrongResultType, format!("{}: expected frame data", endpoint.path())))
}
