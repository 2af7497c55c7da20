//! Spawns and tracks sandboxed Chrome/Chromium processes.
//!
//! Each session is launched with its own user-data directory and a
//! dedicated remote-debugging port. That port doubles as the liveness
//! signal: a monitor task waits for it to open before reporting the
//! session as started, then polls it until it closes to report the
//! session as gone. This catches sessions the user closes from the
//! browser window itself, not just ones closed through us.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use burrow_core::{ProxySpec, RelayInfo, RunningSession, SessionEvent, SessionService};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use super::relay::RelayManager;

const DEBUG_PORT_START: u16 = 9223;
/// How long the monitor waits for the debug port to come up before
/// declaring the spawn dead.
const STARTUP_ATTEMPTS: u32 = 150;
const STARTUP_POLL: Duration = Duration::from_millis(200);
const LIVENESS_POLL: Duration = Duration::from_secs(1);
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
	/// Explicit browser binary; otherwise well-known locations and
	/// `PATH` are searched.
	pub browser_path: Option<PathBuf>,
	pub debug_port_start: u16,
	/// Startup polls before a spawn that never opened its debug port
	/// is reported closed.
	pub startup_attempts: u32,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			browser_path: None,
			debug_port_start: DEBUG_PORT_START,
			startup_attempts: STARTUP_ATTEMPTS,
		}
	}
}

#[derive(Debug, Clone)]
struct InstanceRecord {
	user_dir: String,
	port: u16,
	proxy: Option<String>,
}

/// The real [`SessionService`]: local Chrome processes plus the relay
/// manager, pushing [`SessionEvent`]s as ground truth changes.
pub struct LocalSessionService {
	events: mpsc::UnboundedSender<SessionEvent>,
	instances: Arc<Mutex<HashMap<u32, InstanceRecord>>>,
	relays: RelayManager,
	config: ServiceConfig,
}

impl LocalSessionService {
	pub fn new(events: mpsc::UnboundedSender<SessionEvent>, config: ServiceConfig) -> Self {
		Self {
			events,
			instances: Arc::new(Mutex::new(HashMap::new())),
			relays: RelayManager::new(),
			config,
		}
	}

	/// Stops all relays. Running browser processes are left alone; they
	/// are rediscovered through their debug ports on the next start.
	pub async fn shutdown(&self) {
		self.relays.shutdown().await;
	}

	/// First debug port at or above the configured start that is
	/// neither allocated to a tracked instance nor otherwise bound.
	async fn find_debug_port(&self) -> Result<u16> {
		let taken: Vec<u16> = self.instances.lock().await.values().map(|r| r.port).collect();
		let mut port = self.config.debug_port_start;
		loop {
			if !taken.contains(&port) && std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
				return Ok(port);
			}
			port = match port.checked_add(1) {
				Some(next) => next,
				None => bail!("no free debug port at or above {}", self.config.debug_port_start),
			};
		}
	}
}

#[async_trait]
impl SessionService for LocalSessionService {
	async fn spawn(
		&self,
		name: &str,
		user_dir: &str,
		proxy_addr: Option<&str>,
		port: Option<u16>,
	) -> Result<u32> {
		let port = match port {
			Some(port) => port,
			None => self.find_debug_port().await?,
		};
		let exe = find_browser(self.config.browser_path.as_deref())?;

		let mut command = Command::new(&exe);
		command
			.arg(format!("--user-data-dir={user_dir}"))
			.arg(format!("--remote-debugging-port={port}"))
			.arg("--no-first-run")
			.arg("--no-default-browser-check")
			.arg("--hide-crash-restore-bubble")
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null());
		if let Some(proxy) = proxy_addr {
			command.arg(format!("--proxy-server={proxy}"));
		}
		#[cfg(unix)]
		{
			use std::os::unix::process::CommandExt;
			command.process_group(0);
		}

		let child = command
			.spawn()
			.with_context(|| format!("failed to launch {}", exe.display()))?;
		let pid = child.id();
		info!(target = "burrow.process", name, pid, port, "browser launched");

		self.instances.lock().await.insert(
			pid,
			InstanceRecord {
				user_dir: user_dir.to_string(),
				port,
				proxy: proxy_addr.map(str::to_string),
			},
		);
		tokio::spawn(monitor(
			self.events.clone(),
			Arc::clone(&self.instances),
			name.to_string(),
			user_dir.to_string(),
			pid,
			port,
			self.config.startup_attempts,
		));
		Ok(pid)
	}

	async fn kill(&self, pid: u32) -> Result<()> {
		// The instance record stays; the monitor notices the debug port
		// closing and reports the closure.
		terminate(pid)
	}

	async fn start_relay(&self, spec: &ProxySpec) -> Result<SocketAddr> {
		self.relays.start(spec).await
	}

	async fn stop_relay(&self, local_addr: SocketAddr) -> Result<()> {
		self.relays.stop(local_addr).await
	}

	async fn list_running(&self) -> Result<Vec<RunningSession>> {
		let instances = self.instances.lock().await;
		let mut running = Vec::new();
		for (&pid, record) in instances.iter() {
			if port_open(record.port).await {
				running.push(RunningSession {
					user_dir: record.user_dir.clone(),
					pid,
				});
			}
		}
		Ok(running)
	}

	async fn list_relays(&self) -> Result<Vec<RelayInfo>> {
		Ok(self.relays.list().await)
	}
}

/// Watches one spawned process from startup to exit.
async fn monitor(
	events: mpsc::UnboundedSender<SessionEvent>,
	instances: Arc<Mutex<HashMap<u32, InstanceRecord>>>,
	name: String,
	user_dir: String,
	pid: u32,
	port: u16,
	startup_attempts: u32,
) {
	let mut started = false;
	for _ in 0..startup_attempts {
		if port_open(port).await {
			started = true;
			break;
		}
		tokio::time::sleep(STARTUP_POLL).await;
	}
	if !started {
		// Report the dead spawn as closed so its relay is reclaimed
		// through the usual close correlation.
		warn!(target = "burrow.process", name = %name, pid, port, "debug port never came up");
		let proxy = instances.lock().await.remove(&pid).and_then(|r| r.proxy);
		let _ = events.send(SessionEvent::ProcessClosed { pid, proxy });
		return;
	}

	let _ = events.send(SessionEvent::ProcessStarted {
		name: Some(name.clone()),
		user_dir: user_dir.clone(),
		pid,
	});

	loop {
		tokio::time::sleep(LIVENESS_POLL).await;
		if !port_open(port).await {
			break;
		}
	}

	debug!(target = "burrow.process", name = %name, pid, "debug port closed");
	let proxy = instances.lock().await.remove(&pid).and_then(|r| r.proxy);
	let _ = events.send(SessionEvent::ProcessClosed { pid, proxy });
}

async fn port_open(port: u16) -> bool {
	matches!(
		tokio::time::timeout(PORT_PROBE_TIMEOUT, tokio::net::TcpStream::connect(("127.0.0.1", port))).await,
		Ok(Ok(_))
	)
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
	let status = Command::new("kill")
		.args(["-TERM", &pid.to_string()])
		.status()
		.context("failed to run kill")?;
	if !status.success() {
		bail!("kill -TERM {pid} exited with {status}");
	}
	Ok(())
}

#[cfg(windows)]
fn terminate(pid: u32) -> Result<()> {
	let status = Command::new("taskkill")
		.args(["/PID", &pid.to_string(), "/T", "/F"])
		.status()
		.context("failed to run taskkill")?;
	if !status.success() {
		bail!("taskkill /PID {pid} exited with {status}");
	}
	Ok(())
}

/// Resolves the browser binary: explicit override first, then
/// platform-specific well-known locations, then `PATH`.
fn find_browser(explicit: Option<&std::path::Path>) -> Result<PathBuf> {
	if let Some(path) = explicit {
		if path.exists() {
			return Ok(path.to_path_buf());
		}
		bail!("configured browser path {} does not exist", path.display());
	}

	for candidate in known_locations() {
		let path = PathBuf::from(candidate);
		if path.exists() {
			return Ok(path);
		}
	}
	for name in path_names() {
		if let Ok(path) = which::which(name) {
			return Ok(path);
		}
	}
	bail!("could not find a Chrome or Chromium binary; pass --browser-path")
}

#[cfg(target_os = "linux")]
fn known_locations() -> &'static [&'static str] {
	&[
		"/usr/bin/google-chrome",
		"/usr/bin/google-chrome-stable",
		"/usr/bin/chromium",
		"/usr/bin/chromium-browser",
	]
}

#[cfg(target_os = "macos")]
fn known_locations() -> &'static [&'static str] {
	&[
		"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
		"/Applications/Chromium.app/Contents/MacOS/Chromium",
	]
}

#[cfg(target_os = "windows")]
fn known_locations() -> &'static [&'static str] {
	&[
		"C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe",
		"C:\\Program Files (x86)\\Google\\Chrome\\Application\\chrome.exe",
	]
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn known_locations() -> &'static [&'static str] {
	&[]
}

fn path_names() -> &'static [&'static str] {
	&["google-chrome", "google-chrome-stable", "chromium", "chromium-browser", "chrome"]
}

#[cfg(all(test, unix))]
mod tests {
	use std::time::Duration;

	use burrow_core::{Coordinator, CoordinatorConfig, Reconciler, SessionRegistry};
	use tempfile::TempDir;

	use super::*;

	/// A binary that exits immediately stands in for a browser that
	/// dies before opening its debug port.
	#[tokio::test]
	async fn dead_spawn_reports_closed_and_relay_is_reclaimed() {
		let (events_tx, mut events_rx) = mpsc::unbounded_channel();
		let service = Arc::new(LocalSessionService::new(
			events_tx,
			ServiceConfig {
				browser_path: Some(PathBuf::from("/bin/true")),
				startup_attempts: 2,
				..ServiceConfig::default()
			},
		));

		let spec: ProxySpec = "socks5://127.0.0.1:1080".parse().unwrap();
		let relay_addr = service.start_relay(&spec).await.unwrap();
		let proxy_arg = format!("socks5://{relay_addr}");

		let dir = TempDir::new().unwrap();
		let user_dir = dir.path().join("abc123");
		let pid = service
			.spawn("abc123", &user_dir.to_string_lossy(), Some(&proxy_arg), None)
			.await
			.unwrap();

		let event = tokio::time::timeout(Duration::from_secs(10), events_rx.recv())
			.await
			.expect("closed notification within the startup window")
			.expect("events channel open");
		match &event {
			SessionEvent::ProcessClosed { pid: closed, proxy } => {
				assert_eq!(*closed, pid);
				assert_eq!(proxy.as_deref(), Some(proxy_arg.as_str()));
			}
			other => panic!("unexpected event {other:?}"),
		}
		assert!(service.list_running().await.unwrap().is_empty());

		// The usual close correlation reclaims the relay.
		let registry = SessionRegistry::new();
		let coordinator = Arc::new(Coordinator::new(
			registry.clone(),
			Arc::clone(&service),
			CoordinatorConfig::new(dir.path().to_path_buf()),
		));
		Reconciler::new(registry, coordinator).apply(event).await;
		assert!(service.list_relays().await.unwrap().is_empty());
	}
}
