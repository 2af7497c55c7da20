//! Runs the orchestrator and control API in the foreground.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use burrow_core::{Coordinator, CoordinatorConfig, Reconciler, SessionRegistry};
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use crate::api::{self, ApiState};
use crate::cli::ServeArgs;
use crate::service::{LocalSessionService, ServiceConfig};
use crate::store::CatalogStore;

pub async fn run(args: ServeArgs, api_port: u16) -> Result<()> {
	let store = match &args.data_dir {
		Some(dir) => CatalogStore::open(dir.join("catalog.json"))?,
		None => CatalogStore::open_default()?,
	};
	let profiles_root = store.profiles_root();
	fs::create_dir_all(&profiles_root)
		.with_context(|| format!("failed to create {}", profiles_root.display()))?;

	let (events_tx, events_rx) = mpsc::unbounded_channel();
	let service = Arc::new(LocalSessionService::new(
		events_tx.clone(),
		ServiceConfig {
			browser_path: args.browser_path.clone(),
			..ServiceConfig::default()
		},
	));

	let registry = SessionRegistry::new();
	let mut config = CoordinatorConfig::new(profiles_root);
	config.loading_timeout = args.loading_timeout.map(Duration::from_secs);

	let coordinator = Arc::new(
		Coordinator::new(registry.clone(), Arc::clone(&service), config).with_failure_hook(Arc::new(
			|name, reason| {
				error!(target = "burrow.serve", name, reason, "session failed to open");
			},
		)),
	);

	// Pick up sessions that survived a previous run.
	coordinator.resync().await?;

	let reconciler = Reconciler::new(registry.clone(), Arc::clone(&coordinator));
	let reconciler_task = tokio::spawn(reconciler.run(events_rx));

	let mut snapshots = registry.subscribe();
	let watch_task = tokio::spawn(async move {
		while snapshots.changed().await.is_ok() {
			let rows = snapshots.borrow_and_update().clone();
			info!(target = "burrow.serve", sessions = rows.len(), "session state changed");
		}
	});

	let state = ApiState {
		store: Arc::new(Mutex::new(store)),
		service: Arc::clone(&service),
		coordinator: Arc::clone(&coordinator),
		registry: registry.clone(),
		events: events_tx,
	};
	let mut api_task = tokio::spawn(api::serve(api_port, state));

	tokio::select! {
		_ = shutdown_signal() => {
			info!(target = "burrow.serve", "shutdown signal received");
		}
		result = &mut api_task => {
			match result {
				Ok(Ok(())) => warn!(target = "burrow.serve", "control API exited"),
				Ok(Err(err)) => return Err(err),
				Err(err) => return Err(err).context("control API task panicked"),
			}
		}
	}

	api_task.abort();
	watch_task.abort();
	reconciler_task.abort();
	service.shutdown().await;
	info!(target = "burrow.serve", "stopped");
	Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = match signal(SignalKind::terminate()) {
		Ok(sigterm) => sigterm,
		Err(err) => {
			warn!(target = "burrow.serve", error = %err, "failed to install SIGTERM handler");
			let _ = tokio::signal::ctrl_c().await;
			return;
		}
	};
	tokio::select! {
		_ = tokio::signal::ctrl_c() => {}
		_ = sigterm.recv() => {}
	}
}

#[cfg(not(unix))]
async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
}
