//! In-process fake bridge daemon for integration tests.
//!
//! Implements the daemon's HTTP surface on an ephemeral port: global
//! incrementing sessions, `wrong previous session` arbitration on acquire,
//! a per session FIFO between `/post` and `/read`, and a `/listen` long poll
//! that answers once the device list differs from the one posted.
//!
//! `/call` and `/read` share one read slot per session; a second one while
//! the slot is taken gets `other call in progress`. `/post` only queues and
//! never conflicts.
//!
//! ```ignore
//! let bridge = FakeBridgeBuilder::new().device("1").start().await;
//! let transport = bridge.transport();
//! transport.init(None).await?;
//! bridge.disconnect("1");
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use hwbridge::protocol::MessageSchema;
use hwbridge::{BridgeConfig, BridgeTransport};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One request as the daemon saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
	pub uri: String,
	pub body: String,
	pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
struct Device {
	path: String,
	session: Option<String>,
}

#[derive(Default)]
struct Daemon {
	devices: Vec<Device>,
	next_session: u64,
	busy: HashSet<String>,
	queues: HashMap<String, VecDeque<(String, Option<String>)>>,
	requests: Vec<RecordedRequest>,
	listen_frozen: bool,
	listen_refused: bool,
	call_delay: Duration,
}

impl Daemon {
	fn snapshot(&self) -> Vec<(String, Option<String>)> {
		self.devices.iter().map(|d| (d.path.clone(), d.session.clone())).collect()
	}

	fn descriptors(&self) -> Value {
		Value::Array(
			self.devices
				.iter()
				.map(|d| {
					json!({
						"path": d.path,
						"session": d.session,
						"product": 21441,
						"vendor": 4617,
						"debug": false,
						"debugSession": null
					})
				})
				.collect(),
		)
	}

	fn has_session(&self, session: &str) -> bool {
		self.devices.iter().any(|d| d.session.as_deref() == Some(session))
	}
}

struct Shared {
	daemon: Mutex<Daemon>,
	changed: watch::Sender<u64>,
	version: String,
	protocol_messages: bool,
}

impl Shared {
	fn bump(&self) {
		self.changed.send_modify(|n| *n += 1);
	}

	fn record(&self, uri: String, headers: &HeaderMap, body: &str) {
		let content_type = headers
			.get(axum::http::header::CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string);
		self.daemon.lock().requests.push(RecordedRequest {
			uri,
			body: body.to_string(),
			content_type,
		});
	}

	/// Reads the frame out of a request body in the shape this daemon expects.
	fn read_frame(&self, body: &str) -> Option<(String, Option<String>)> {
		if self.protocol_messages {
			let envelope: Value = serde_json::from_str(body).ok()?;
			let data = envelope.get("data")?.as_str()?.to_string();
			let protocol = envelope.get("protocol").and_then(Value::as_str).map(str::to_string);
			Some((data, protocol))
		} else {
			Some((body.trim().to_string(), None))
		}
	}

	fn write_frame(&self, data: String, protocol: Option<String>) -> Response {
		if self.protocol_messages {
			Json(json!({ "data": data, "protocol": protocol })).into_response()
		} else {
			data.into_response()
		}
	}
}

fn daemon_error(text: &str) -> Response {
	(StatusCode::BAD_REQUEST, Json(json!({ "error": text }))).into_response()
}

/// A session's read slot, freed when the handler returns or is dropped.
struct ReadSlot {
	shared: Arc<Shared>,
	session: String,
}

impl ReadSlot {
	fn claim(shared: &Arc<Shared>, session: &str) -> Result<Self, Response> {
		let mut daemon = shared.daemon.lock();
		if !daemon.has_session(session) {
			return Err(daemon_error("session not found"));
		}
		if !daemon.busy.insert(session.to_string()) {
			return Err(daemon_error("other call in progress"));
		}
		Ok(Self {
			shared: Arc::clone(shared),
			session: session.to_string(),
		})
	}
}

impl Drop for ReadSlot {
	fn drop(&mut self) {
		self.shared.daemon.lock().busy.remove(&self.session);
	}
}

pub struct FakeBridgeBuilder {
	version: String,
	protocol_messages: bool,
	devices: Vec<String>,
	call_delay: Duration,
}

impl FakeBridgeBuilder {
	pub fn new() -> Self {
		Self {
			version: "2.0.33".to_string(),
			protocol_messages: false,
			devices: Vec::new(),
			call_delay: Duration::ZERO,
		}
	}

	pub fn version(mut self, version: &str) -> Self {
		self.version = version.to_string();
		self
	}

	pub fn protocol_messages(mut self, enabled: bool) -> Self {
		self.protocol_messages = enabled;
		self
	}

	pub fn device(mut self, path: &str) -> Self {
		self.devices.push(path.to_string());
		self
	}

	/// How long `/call` holds the session busy before answering.
	pub fn call_delay(mut self, delay: Duration) -> Self {
		self.call_delay = delay;
		self
	}

	pub async fn start(self) -> FakeBridge {
		let daemon = Daemon {
			devices: self
				.devices
				.into_iter()
				.map(|path| Device { path, session: None })
				.collect(),
			call_delay: self.call_delay,
			..Default::default()
		};
		let (changed, _) = watch::channel(0);
		let shared = Arc::new(Shared {
			daemon: Mutex::new(daemon),
			changed,
			version: self.version,
			protocol_messages: self.protocol_messages,
		});

		let app = Router::new()
			.route("/", post(info))
			.route("/enumerate", post(enumerate))
			.route("/listen", post(listen))
			.route("/acquire/{path}/{previous}", post(acquire))
			.route("/release/{session}", post(release))
			.route("/call/{session}", post(call))
			.route("/post/{session}", post(post_message))
			.route("/read/{session}", post(read))
			.with_state(Arc::clone(&shared));

		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});

		FakeBridge {
			url: format!("http://{addr}"),
			shared,
			server,
		}
	}
}

impl Default for FakeBridgeBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Running fake daemon plus controls for the test.
pub struct FakeBridge {
	url: String,
	shared: Arc<Shared>,
	server: JoinHandle<()>,
}

impl FakeBridge {
	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn config(&self) -> BridgeConfig {
		BridgeConfig::new(&self.url)
	}

	pub fn transport(&self) -> BridgeTransport {
		self.transport_with(self.config())
	}

	pub fn transport_with(&self, config: BridgeConfig) -> BridgeTransport {
		BridgeTransport::new(config, Arc::new(schema())).unwrap()
	}

	pub fn connect(&self, path: &str) {
		self.shared.daemon.lock().devices.push(Device {
			path: path.to_string(),
			session: None,
		});
		self.shared.bump();
	}

	pub fn disconnect(&self, path: &str) {
		self.shared.daemon.lock().devices.retain(|d| d.path != path);
		self.shared.bump();
	}

	/// While frozen, `/listen` never answers.
	pub fn freeze_listen(&self, frozen: bool) {
		self.shared.daemon.lock().listen_frozen = frozen;
		self.shared.bump();
	}

	/// Makes `/listen` fail immediately.
	pub fn refuse_listen(&self, refused: bool) {
		self.shared.daemon.lock().listen_refused = refused;
	}

	pub fn session_of(&self, path: &str) -> Option<String> {
		self.shared
			.daemon
			.lock()
			.devices
			.iter()
			.find(|d| d.path == path)
			.and_then(|d| d.session.clone())
	}

	pub fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
		self.shared
			.daemon
			.lock()
			.requests
			.iter()
			.filter(|r| r.uri.starts_with(prefix))
			.cloned()
			.collect()
	}
}

impl Drop for FakeBridge {
	fn drop(&mut self) {
		self.server.abort();
	}
}

/// Message table used by the tests.
pub fn schema() -> MessageSchema {
	MessageSchema::from_value(json!({
		"messages": [
			{ "name": "Ping", "wire_type": 1, "fields": [
				{ "name": "message", "id": 1, "type": "string" },
				{ "name": "button_protection", "id": 2, "type": "bool" }
			]},
			{ "name": "Success", "wire_type": 2, "fields": [
				{ "name": "message", "id": 1, "type": "string" }
			]}
		]
	}))
	.unwrap()
}

/// Fails the test instead of hanging when `future` does not finish in time.
pub async fn within<F: Future>(future: F) -> F::Output {
	tokio::time::timeout(Duration::from_secs(5), future)
		.await
		.expect("operation did not finish in time")
}

async fn info(State(shared): State<Arc<Shared>>, headers: HeaderMap, body: String) -> Response {
	shared.record("/".to_string(), &headers, &body);
	let mut info = json!({ "version": shared.version });
	if shared.protocol_messages {
		info["protocolMessages"] = json!(true);
	}
	Json(info).into_response()
}

async fn enumerate(State(shared): State<Arc<Shared>>, headers: HeaderMap, body: String) -> Response {
	shared.record("/enumerate".to_string(), &headers, &body);
	Json(shared.daemon.lock().descriptors()).into_response()
}

#[derive(Deserialize)]
struct KnownDescriptor {
	path: String,
	session: Option<String>,
}

async fn listen(State(shared): State<Arc<Shared>>, headers: HeaderMap, body: String) -> Response {
	shared.record("/listen".to_string(), &headers, &body);
	let known: Vec<(String, Option<String>)> = match serde_json::from_str::<Vec<KnownDescriptor>>(&body) {
		Ok(known) => known.into_iter().map(|d| (d.path, d.session)).collect(),
		Err(_) => return daemon_error("malformed listen body"),
	};

	let mut changed = shared.changed.subscribe();
	loop {
		{
			let daemon = shared.daemon.lock();
			if daemon.listen_refused {
				return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "listen refused" }))).into_response();
			}
			if !daemon.listen_frozen && daemon.snapshot() != known {
				return Json(daemon.descriptors()).into_response();
			}
		}
		if changed.changed().await.is_err() {
			return daemon_error("daemon shutting down");
		}
	}
}

async fn acquire(
	State(shared): State<Arc<Shared>>,
	Path((path, previous)): Path<(String, String)>,
	headers: HeaderMap,
	body: String,
) -> Response {
	shared.record(format!("/acquire/{path}/{previous}"), &headers, &body);
	let previous = (previous != "null").then_some(previous);

	let session = {
		let mut guard = shared.daemon.lock();
		let daemon = &mut *guard;
		let Some(device) = daemon.devices.iter_mut().find(|d| d.path == path) else {
			return daemon_error("device not found");
		};
		if device.session != previous {
			return daemon_error("wrong previous session");
		}
		daemon.next_session += 1;
		let next = daemon.next_session.to_string();
		if let Some(stolen) = device.session.replace(next.clone()) {
			daemon.queues.remove(&stolen);
		}
		next
	};
	shared.bump();
	Json(json!({ "session": session })).into_response()
}

async fn release(State(shared): State<Arc<Shared>>, Path(session): Path<String>, headers: HeaderMap, body: String) -> Response {
	shared.record(format!("/release/{session}"), &headers, &body);
	{
		let mut daemon = shared.daemon.lock();
		let Some(device) = daemon.devices.iter_mut().find(|d| d.session.as_deref() == Some(session.as_str())) else {
			return daemon_error("session not found");
		};
		device.session = None;
		daemon.queues.remove(&session);
	}
	shared.bump();
	Json(json!({ "session": session })).into_response()
}

async fn call(State(shared): State<Arc<Shared>>, Path(session): Path<String>, headers: HeaderMap, body: String) -> Response {
	shared.record(format!("/call/{session}"), &headers, &body);
	let slot = match ReadSlot::claim(&shared, &session) {
		Ok(slot) => slot,
		Err(rejected) => return rejected,
	};
	let delay = shared.daemon.lock().call_delay;
	tokio::time::sleep(delay).await;
	drop(slot);

	match shared.read_frame(&body) {
		Some((data, protocol)) => shared.write_frame(data, protocol),
		None => daemon_error("malformed data"),
	}
}

async fn post_message(State(shared): State<Arc<Shared>>, Path(session): Path<String>, headers: HeaderMap, body: String) -> Response {
	shared.record(format!("/post/{session}"), &headers, &body);
	let Some(frame) = shared.read_frame(&body) else {
		return daemon_error("malformed data");
	};
	let mut daemon = shared.daemon.lock();
	if !daemon.has_session(&session) {
		return daemon_error("session not found");
	}
	daemon.queues.entry(session).or_default().push_back(frame);
	Json(json!({})).into_response()
}

async fn read(State(shared): State<Arc<Shared>>, Path(session): Path<String>, headers: HeaderMap, body: String) -> Response {
	shared.record(format!("/read/{session}"), &headers, &body);
	let _slot = match ReadSlot::claim(&shared, &session) {
		Ok(slot) => slot,
		Err(rejected) => return rejected,
	};
	loop {
		let next = {
			let mut daemon = shared.daemon.lock();
			if !daemon.has_session(&session) {
				return daemon_error("session not found");
			}
			daemon.queues.get_mut(&session).and_then(VecDeque::pop_front)
		};
		if let Some((data, protocol)) = next {
			return shared.write_frame(data, protocol);
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}
