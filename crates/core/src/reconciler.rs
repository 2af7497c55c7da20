//! Applies asynchronous ground-truth notifications to the registry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::profile::{Profile, basename};
use crate::registry::SessionRegistry;
use crate::service::SessionService;

/// Notifications pushed by the process/relay service and the external
/// control channel.
///
/// Delivery order is unconstrained relative to local intents; every
/// handler is a safe no-op when its target is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
	/// A sandboxed process came up. `name` is echoed by the in-process
	/// service; sessions discovered externally carry only `user_dir`.
	ProcessStarted {
		name: Option<String>,
		user_dir: String,
		pid: u32,
	},
	/// A sandboxed process went away. `proxy` is the relay argument the
	/// process was launched with, if any.
	ProcessClosed { pid: u32, proxy: Option<String> },
	/// The control API asked for a profile to be opened.
	LaunchRequested {
		id: u64,
		name: String,
		proxy_name: Option<String>,
		port: Option<u16>,
	},
	/// The control API asked for a running session to be closed.
	CloseRequested { name: String, pid: u32 },
}

/// Consumes [`SessionEvent`]s and reconciles the registry against them.
pub struct Reconciler<S: SessionService> {
	registry: SessionRegistry,
	coordinator: Arc<Coordinator<S>>,
}

impl<S: SessionService + 'static> Reconciler<S> {
	pub fn new(registry: SessionRegistry, coordinator: Arc<Coordinator<S>>) -> Self {
		Self { registry, coordinator }
	}

	/// Drains the event channel until all senders are dropped.
	pub async fn run(self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
		while let Some(event) = events.recv().await {
			self.apply(event).await;
		}
	}

	/// Applies a single notification.
	pub async fn apply(&self, event: SessionEvent) {
		match event {
			SessionEvent::ProcessStarted { name, user_dir, pid } => {
				self.on_started(name, &user_dir, pid);
			}
			SessionEvent::ProcessClosed { pid, proxy } => {
				self.on_closed(pid, proxy.as_deref()).await;
			}
			SessionEvent::LaunchRequested {
				id,
				name,
				proxy_name,
				port,
			} => {
				self.on_launch_requested(id, name, proxy_name, port).await;
			}
			SessionEvent::CloseRequested { name, pid } => {
				self.on_close_requested(&name, pid).await;
			}
		}
	}

	fn on_started(&self, name: Option<String>, user_dir: &str, pid: u32) {
		// Prefer the name echoed at spawn time; path derivation remains
		// the fallback for sessions this instance did not start.
		let resolved = name.or_else(|| basename(user_dir).map(str::to_string));
		let Some(name) = resolved else {
			warn!(target = "burrow.reconcile", user_dir, pid, "start notification without derivable name");
			return;
		};
		info!(target = "burrow.reconcile", name = %name, pid, "session started");
		self.registry.confirm_started(&name, pid);
	}

	async fn on_closed(&self, pid: u32, proxy: Option<&str>) {
		info!(target = "burrow.reconcile", pid, "session closed");
		self.registry.confirm_closed(pid);
		if let Some(proxy) = proxy {
			self.teardown_relay(proxy).await;
		}
	}

	/// Finds the active relay whose local address matches the proxy
	/// argument (scheme prefix stripped) and tears exactly that one
	/// down. A miss means the relay is already gone; that is benign.
	async fn teardown_relay(&self, proxy: &str) {
		let wanted = proxy.split_once("://").map_or(proxy, |(_, rest)| rest);

		let relays = match self.coordinator.service().list_relays().await {
			Ok(relays) => relays,
			Err(err) => {
				warn!(target = "burrow.reconcile", error = %err, "relay query failed during teardown");
				return;
			}
		};

		let Some(relay) = relays.iter().find(|r| r.local_addr.to_string() == wanted) else {
			debug!(target = "burrow.reconcile", proxy = %wanted, "no matching relay; already stopped");
			return;
		};

		match self.coordinator.service().stop_relay(relay.local_addr).await {
			Ok(()) => debug!(target = "burrow.reconcile", addr = %relay.local_addr, "relay stopped"),
			Err(err) => {
				warn!(
					target = "burrow.reconcile",
					addr = %relay.local_addr,
					error = %err,
					"relay stop failed"
				);
			}
		}
	}

	async fn on_launch_requested(&self, id: u64, name: String, proxy_name: Option<String>, port: Option<u16>) {
		info!(target = "burrow.reconcile", name = %name, "external launch request");
		let profile = Profile::external(id, name, proxy_name);
		self.registry.upsert_loading(&[profile.name.as_str()], true);
		self.coordinator.launch(&profile, port).await;
	}

	async fn on_close_requested(&self, name: &str, pid: u32) {
		info!(target = "burrow.reconcile", name = %name, pid, "external close request");
		self.registry.upsert_loading(&[name], false);
		self.coordinator.close(pid).await;
	}
}
