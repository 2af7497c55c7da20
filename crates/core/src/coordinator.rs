//! Launch/close workflow around the session registry.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::profile::{Profile, basename};
use crate::proxy::ProxySpec;
use crate::registry::SessionRegistry;
use crate::service::SessionService;

/// Callback surfaced to the UI boundary when a profile fails to open.
pub type FailureHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
	/// Root under which each profile's user-data directory lives.
	pub profiles_root: PathBuf,
	/// Deadline for a loading-to-open entry to resolve. `None` leaves a
	/// stuck entry indefinitely, matching the behavior before the
	/// timeout policy existed.
	pub loading_timeout: Option<Duration>,
}

impl CoordinatorConfig {
	pub fn new(profiles_root: PathBuf) -> Self {
		Self {
			profiles_root,
			loading_timeout: None,
		}
	}
}

/// Translates launch/close intents into service calls.
///
/// The coordinator's job ends at request submission: registry entries
/// reach their terminal state only through notifications applied by the
/// reconciler, never synchronously here. Callers mark entries loading
/// before invoking [`Coordinator::launch`] or [`Coordinator::close`].
pub struct Coordinator<S: SessionService> {
	registry: SessionRegistry,
	service: Arc<S>,
	config: CoordinatorConfig,
	on_failure: FailureHook,
}

impl<S: SessionService + 'static> Coordinator<S> {
	pub fn new(registry: SessionRegistry, service: Arc<S>, config: CoordinatorConfig) -> Self {
		Self {
			registry,
			service,
			config,
			on_failure: Arc::new(|_, _| {}),
		}
	}

	/// Installs the failure callback invoked once per failed profile.
	pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
		self.on_failure = hook;
		self
	}

	pub fn registry(&self) -> &SessionRegistry {
		&self.registry
	}

	pub fn service(&self) -> &Arc<S> {
		&self.service
	}

	/// Drives one profile from accepted intent to a submitted spawn.
	///
	/// A required relay is provisioned first; if the stored proxy string
	/// is malformed or the relay cannot start, the pending entry is
	/// removed and the failure hook fires without the process ever being
	/// spawned. A successful spawn only submits the request; `running`
	/// arrives later via the start notification.
	pub async fn launch(&self, profile: &Profile, explicit_port: Option<u16>) {
		let relay_addr = match &profile.proxy_name {
			Some(raw) => {
				let spec: ProxySpec = match raw.parse() {
					Ok(spec) => spec,
					Err(err) => {
						self.fail(&profile.name, &err.to_string());
						return;
					}
				};
				match self.service.start_relay(&spec).await {
					Ok(addr) => Some((addr, format!("{}://{}", spec.protocol, addr))),
					Err(err) => {
						self.fail(&profile.name, &format!("relay start failed: {err:#}"));
						return;
					}
				}
			}
			None => None,
		};

		let user_dir = self.config.profiles_root.join(&profile.name);
		let user_dir = user_dir.to_string_lossy();
		let proxy_arg = relay_addr.as_ref().map(|(_, arg)| arg.as_str());

		match self.service.spawn(&profile.name, &user_dir, proxy_arg, explicit_port).await {
			Ok(pid) => {
				debug!(
					target = "burrow.session",
					name = %profile.name,
					pid,
					proxy = ?proxy_arg,
					"spawn submitted"
				);
				self.arm_loading_watchdog(&profile.name);
			}
			Err(err) => {
				if let Some((addr, _)) = relay_addr {
					if let Err(stop_err) = self.service.stop_relay(addr).await {
						warn!(
							target = "burrow.session",
							%addr,
							error = %stop_err,
							"failed to stop relay after aborted launch"
						);
					}
				}
				self.fail(&profile.name, &format!("spawn failed: {err:#}"));
			}
		}
	}

	/// Submits a termination request. The registry entry is removed only
	/// by the close notification, never here.
	pub async fn close(&self, pid: u32) {
		if let Err(err) = self.service.kill(pid).await {
			warn!(target = "burrow.session", pid, error = %err, "kill request failed");
		}
	}

	/// Opens every selected profile that is not already running.
	///
	/// The registry snapshot may be stale relative to reality (sessions
	/// started outside this instance), so the set of live sessions is
	/// queried fresh and intersected by name before fanning out. Each
	/// launch is independent; one failure neither blocks nor cancels the
	/// rest.
	pub async fn open_selected(&self, profiles: &[Profile]) {
		let live = self.live_names().await;
		let to_open: Vec<&Profile> = profiles.iter().filter(|p| !live.contains(&p.name)).collect();
		if to_open.is_empty() {
			return;
		}

		let names: Vec<&str> = to_open.iter().map(|p| p.name.as_str()).collect();
		self.registry.upsert_loading(&names, true);

		join_all(to_open.iter().map(|p| self.launch(p, None))).await;
	}

	/// Closes every selected profile that currently has a live session,
	/// resolving pids from a fresh live-session query.
	pub async fn close_selected(&self, profiles: &[Profile]) {
		let selected: HashSet<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
		let live = match self.service.list_running().await {
			Ok(live) => live,
			Err(err) => {
				warn!(target = "burrow.session", error = %err, "live session query failed");
				return;
			}
		};

		let targets: Vec<(String, u32)> = live
			.iter()
			.filter_map(|session| {
				basename(&session.user_dir)
					.filter(|name| selected.contains(name))
					.map(|name| (name.to_string(), session.pid))
			})
			.collect();
		if targets.is_empty() {
			return;
		}

		let names: Vec<&str> = targets.iter().map(|(name, _)| name.as_str()).collect();
		self.registry.upsert_loading(&names, false);

		join_all(targets.iter().map(|(_, pid)| self.close(*pid))).await;
	}

	/// Rebuilds the registry from the service's view of live sessions.
	/// Called at startup; tracked state has no persistence of its own.
	pub async fn resync(&self) -> crate::Result<()> {
		let live = self.service.list_running().await?;
		let entries = live
			.iter()
			.filter_map(|session| basename(&session.user_dir).map(|name| (name.to_string(), session.pid)))
			.collect();
		self.registry.resync(entries);
		Ok(())
	}

	async fn live_names(&self) -> HashSet<String> {
		match self.service.list_running().await {
			Ok(live) => live
				.iter()
				.filter_map(|session| basename(&session.user_dir).map(str::to_string))
				.collect(),
			Err(err) => {
				warn!(target = "burrow.session", error = %err, "live session query failed; assuming none");
				HashSet::new()
			}
		}
	}

	fn arm_loading_watchdog(&self, name: &str) {
		let Some(timeout) = self.config.loading_timeout else {
			return;
		};
		let registry = self.registry.clone();
		let on_failure = Arc::clone(&self.on_failure);
		let name = name.to_string();
		tokio::spawn(async move {
			tokio::time::sleep(timeout).await;
			if let Some(status) = registry.get(&name) {
				if status.loading && !status.running {
					registry.abort_launch(&name);
					warn!(target = "burrow.session", name = %name, "session start timed out");
					on_failure(&name, "timed out waiting for session to start");
				}
			}
		});
	}

	fn fail(&self, name: &str, reason: &str) {
		warn!(target = "burrow.session", name = %name, reason = %reason, "open failed");
		self.registry.abort_launch(name);
		(self.on_failure)(name, reason);
	}
}
