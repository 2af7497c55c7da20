//! Client for the loopback control API.
//!
//! `open`, `close` and `status` subcommands do not orchestrate
//! anything themselves; they talk to a running `burrow serve`.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
struct Envelope {
	success: bool,
	data: Option<Value>,
	msg: Option<String>,
}

pub struct ControlClient {
	base: String,
	http: reqwest::Client,
}

impl ControlClient {
	pub fn new(port: u16) -> Self {
		Self {
			base: format!("http://127.0.0.1:{port}"),
			http: reqwest::Client::new(),
		}
	}

	/// Requests a launch for the profile with the given id. Returns the
	/// server's acknowledgement payload.
	pub async fn open(&self, id: u64) -> Result<Value> {
		self.post("/api/browser/open", json!({ "id": id })).await
	}

	/// Requests closure of the profile's running session.
	pub async fn close(&self, id: u64) -> Result<Value> {
		self.post("/api/browser/close", json!({ "id": id })).await
	}

	/// Requests launches for a whole batch of profile names at once.
	pub async fn open_selected(&self, names: &[String]) -> Result<Value> {
		self.post("/api/browser/open-selected", json!({ "names": names })).await
	}

	/// Requests closure of every named profile's running session.
	pub async fn close_selected(&self, names: &[String]) -> Result<Value> {
		self.post("/api/browser/close-selected", json!({ "names": names })).await
	}

	/// Lists currently-alive sessions as the server sees them.
	pub async fn active(&self) -> Result<Vec<Value>> {
		let data = self.post("/api/browser/active", json!({})).await?;
		serde_json::from_value(data).context("unexpected active-session payload")
	}

	async fn post(&self, path: &str, body: Value) -> Result<Value> {
		let response = self
			.http
			.post(format!("{}{path}", self.base))
			.json(&body)
			.send()
			.await
			.with_context(|| format!("could not reach the control API at {}; is `burrow serve` running?", self.base))?;
		let envelope: Envelope = response
			.json()
			.await
			.with_context(|| format!("invalid response from {path}"))?;
		if !envelope.success {
			bail!("{}", envelope.msg.unwrap_or_else(|| format!("{path} failed")));
		}
		Ok(envelope.data.unwrap_or(Value::Null))
	}
}
