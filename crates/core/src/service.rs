//! The process/relay capability the orchestrator drives.

use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::proxy::ProxySpec;

/// A currently-alive sandboxed process as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningSession {
	pub user_dir: String,
	pub pid: u32,
}

/// An active per-session proxy relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInfo {
	pub local_addr: SocketAddr,
	/// Credential-stripped upstream spec, for display.
	pub remote: String,
}

/// Capability to spawn/kill sandboxed browser processes and provision
/// local proxy relays.
///
/// Implementations additionally push [`crate::SessionEvent`]s when
/// processes come up or go away; the trait itself only covers the
/// request/response half.
#[async_trait]
pub trait SessionService: Send + Sync {
	/// Spawns the sandboxed process for `name` with the given isolated
	/// user-data directory, optional proxy argument and optional debug
	/// port. Returns the OS pid.
	async fn spawn(
		&self,
		name: &str,
		user_dir: &str,
		proxy_addr: Option<&str>,
		port: Option<u16>,
	) -> anyhow::Result<u32>;

	/// Requests termination of the process with the given pid.
	async fn kill(&self, pid: u32) -> anyhow::Result<()>;

	/// Starts a local relay tunnelling to `spec`, returning its bound
	/// local address.
	async fn start_relay(&self, spec: &ProxySpec) -> anyhow::Result<SocketAddr>;

	/// Tears down the relay bound at `local_addr`.
	async fn stop_relay(&self, local_addr: SocketAddr) -> anyhow::Result<()>;

	/// Ground truth of currently-alive sessions.
	async fn list_running(&self) -> anyhow::Result<Vec<RunningSession>>;

	/// Currently-active relays.
	async fn list_relays(&self) -> anyhow::Result<Vec<RelayInfo>>;
}
