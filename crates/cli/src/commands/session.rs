//! `open`, `close` and `status` against a running `burrow serve`.

use anyhow::Result;
use tracing::warn;

use crate::cli::{CloseArgs, OpenArgs};
use crate::client::ControlClient;

/// Submits the whole batch in one request; the server dedupes against
/// live sessions and isolates per-profile failures.
pub async fn open(args: OpenArgs, api_port: u16) -> Result<()> {
	let client = ControlClient::new(api_port);
	let ack = client.open_selected(&args.names).await?;
	report(&ack, "open requested");
	Ok(())
}

pub async fn close(args: CloseArgs, api_port: u16) -> Result<()> {
	let client = ControlClient::new(api_port);
	let ack = client.close_selected(&args.names).await?;
	report(&ack, "close requested");
	Ok(())
}

fn report(ack: &serde_json::Value, verb: &str) {
	if let Some(accepted) = ack.get("accepted").and_then(|v| v.as_array()) {
		for name in accepted.iter().filter_map(|v| v.as_str()) {
			println!("{verb}: {name}");
		}
	}
	if let Some(unknown) = ack.get("unknown").and_then(|v| v.as_array()) {
		for name in unknown.iter().filter_map(|v| v.as_str()) {
			warn!(target = "burrow", name, "no such profile");
		}
	}
}

pub async fn status(api_port: u16) -> Result<()> {
	let client = ControlClient::new(api_port);
	let sessions = client.active().await?;
	if sessions.is_empty() {
		println!("no active sessions");
		return Ok(());
	}
	println!("{:<12} {:<8} {}", "NAME", "PID", "USER DIR");
	for session in &sessions {
		println!(
			"{:<12} {:<8} {}",
			session.get("name").and_then(|v| v.as_str()).unwrap_or("?"),
			session.get("pid").and_then(|v| v.as_u64()).unwrap_or(0),
			session.get("user_dir").and_then(|v| v.as_str()).unwrap_or(""),
		);
	}
	Ok(())
}
