//! Loopback control API.
//!
//! External tooling drives launches and closes through this surface
//! instead of the CLI. Open and close are asynchronous: the handler
//! validates the request, queues an event for the reconciler and
//! returns immediately; outcomes land in the registry later.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use burrow_core::{Coordinator, Profile, SessionEvent, SessionRegistry, SessionService};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tracing::info;

use crate::service::LocalSessionService;
use crate::store::{CatalogStore, GroupEntry};

pub const DEFAULT_API_PORT: u16 = 51888;

#[derive(Clone)]
pub struct ApiState {
	pub store: Arc<Mutex<CatalogStore>>,
	pub service: Arc<LocalSessionService>,
	pub coordinator: Arc<Coordinator<LocalSessionService>>,
	pub registry: SessionRegistry,
	pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// Uniform response envelope for every `/api/browser/*` route.
#[derive(Debug, Serialize)]
pub struct Envelope {
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub msg: Option<String>,
}

impl Envelope {
	fn ok(data: Value) -> Json<Self> {
		Json(Self {
			success: true,
			data: Some(data),
			msg: None,
		})
	}

	fn fail(msg: impl Into<String>) -> Json<Self> {
		Json(Self {
			success: false,
			data: None,
			msg: Some(msg.into()),
		})
	}
}

#[derive(Debug, Deserialize)]
struct ListRequest {
	#[serde(default = "default_page")]
	page: usize,
	#[serde(default = "default_page_size")]
	page_size: usize,
	group: Option<String>,
}

fn default_page() -> usize {
	1
}

fn default_page_size() -> usize {
	50
}

#[derive(Debug, Deserialize)]
struct IdRequest {
	id: u64,
}

#[derive(Debug, Deserialize)]
struct NamesRequest {
	names: Vec<String>,
}

pub fn router(state: ApiState) -> Router {
	Router::new()
		.route("/api/status", get(status))
		.route("/api/browser/list", post(browser_list))
		.route("/api/browser/open", post(browser_open))
		.route("/api/browser/close", post(browser_close))
		.route("/api/browser/open-selected", post(browser_open_selected))
		.route("/api/browser/close-selected", post(browser_close_selected))
		.route("/api/browser/active", post(browser_active))
		.route("/api/group/list", post(group_list))
		.with_state(state)
}

/// Binds the loopback listener and serves until the task is dropped.
pub async fn serve(port: u16, state: ApiState) -> Result<()> {
	let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
	let listener = tokio::net::TcpListener::bind(addr)
		.await
		.with_context(|| format!("failed to bind control API at {addr}"))?;
	info!(target = "burrow.api", %addr, "control API listening");
	axum::serve(listener, router(state))
		.await
		.context("control API server error")
}

async fn status() -> Json<Value> {
	Json(json!({ "alive": true }))
}

async fn browser_list(State(state): State<ApiState>, Json(req): Json<ListRequest>) -> Json<Envelope> {
	let store = state.store.lock().await;
	let all = store.list_profiles(req.group.as_deref());
	drop(store);

	let (rows, page, page_size, total) = paginate(&all, req.page, req.page_size);
	Envelope::ok(json!({
		"list": rows,
		"page": page,
		"page_size": page_size,
		"total": total,
	}))
}

async fn group_list(State(state): State<ApiState>, Json(req): Json<ListRequest>) -> Json<Envelope> {
	let all: Vec<GroupEntry> = state.store.lock().await.list_groups().to_vec();

	let (rows, page, page_size, total) = paginate(&all, req.page, req.page_size);
	Envelope::ok(json!({
		"list": rows,
		"page": page,
		"page_size": page_size,
		"total": total,
	}))
}

fn paginate<T>(all: &[T], page: usize, page_size: usize) -> (&[T], usize, usize, usize) {
	let total = all.len();
	let page = page.max(1);
	let page_size = page_size.clamp(1, 500);
	let start = (page - 1).saturating_mul(page_size).min(total);
	let end = start.saturating_add(page_size).min(total);
	(&all[start..end], page, page_size, total)
}

async fn browser_open(State(state): State<ApiState>, Json(req): Json<IdRequest>) -> Json<Envelope> {
	let profile = state.store.lock().await.profile_by_id(req.id);
	let Some(profile) = profile else {
		return Envelope::fail(format!("no profile with id {}", req.id));
	};

	if let Some(status) = state.registry.get(&profile.name) {
		if status.running {
			return Envelope::ok(json!({
				"name": profile.name,
				"pid": status.pid,
				"msg": "already running",
			}));
		}
	}

	let event = SessionEvent::LaunchRequested {
		id: profile.id,
		name: profile.name.clone(),
		proxy_name: profile.proxy_name.clone(),
		port: None,
	};
	if state.events.send(event).is_err() {
		return Envelope::fail("orchestrator is shutting down");
	}
	Envelope::ok(json!({ "name": profile.name }))
}

async fn browser_close(State(state): State<ApiState>, Json(req): Json<IdRequest>) -> Json<Envelope> {
	let profile = state.store.lock().await.profile_by_id(req.id);
	let Some(profile) = profile else {
		return Envelope::fail(format!("no profile with id {}", req.id));
	};

	let pid = state.registry.get(&profile.name).and_then(|s| s.pid);
	let Some(pid) = pid else {
		return Envelope::fail(format!("profile {:?} has no running session", profile.name));
	};

	let event = SessionEvent::CloseRequested {
		name: profile.name.clone(),
		pid,
	};
	if state.events.send(event).is_err() {
		return Envelope::fail("orchestrator is shutting down");
	}
	Envelope::ok(json!({ "name": profile.name, "pid": pid }))
}

/// Bulk open: resolves the named profiles and hands the batch to the
/// coordinator, which dedupes against live sessions and isolates
/// per-profile failures. Returns once the batch is accepted.
async fn browser_open_selected(State(state): State<ApiState>, Json(req): Json<NamesRequest>) -> Json<Envelope> {
	let (known, unknown) = resolve_names(&state, &req.names).await;
	if known.is_empty() {
		return Envelope::fail("no matching profiles");
	}
	let accepted: Vec<String> = known.iter().map(|p| p.name.clone()).collect();
	let coordinator = Arc::clone(&state.coordinator);
	tokio::spawn(async move {
		coordinator.open_selected(&known).await;
	});
	Envelope::ok(json!({ "accepted": accepted, "unknown": unknown }))
}

async fn browser_close_selected(State(state): State<ApiState>, Json(req): Json<NamesRequest>) -> Json<Envelope> {
	let (known, unknown) = resolve_names(&state, &req.names).await;
	if known.is_empty() {
		return Envelope::fail("no matching profiles");
	}
	let accepted: Vec<String> = known.iter().map(|p| p.name.clone()).collect();
	let coordinator = Arc::clone(&state.coordinator);
	tokio::spawn(async move {
		coordinator.close_selected(&known).await;
	});
	Envelope::ok(json!({ "accepted": accepted, "unknown": unknown }))
}

async fn resolve_names(state: &ApiState, names: &[String]) -> (Vec<Profile>, Vec<String>) {
	let store = state.store.lock().await;
	let mut known = Vec::new();
	let mut unknown = Vec::new();
	for name in names {
		match store.profile_by_name(name) {
			Some(profile) => known.push(profile),
			None => unknown.push(name.clone()),
		}
	}
	(known, unknown)
}

async fn browser_active(State(state): State<ApiState>) -> Json<Envelope> {
	match state.service.list_running().await {
		Ok(live) => {
			let rows: Vec<Value> = live
				.iter()
				.map(|session| {
					json!({
						"name": burrow_core::profile::basename(&session.user_dir),
						"pid": session.pid,
						"user_dir": session.user_dir,
					})
				})
				.collect();
			Envelope::ok(json!(rows))
		}
		Err(err) => Envelope::fail(format!("live session query failed: {err:#}")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn envelope_omits_empty_fields() {
		let ok = serde_json::to_value(&Envelope {
			success: true,
			data: Some(json!({ "name": "abc123" })),
			msg: None,
		})
		.unwrap();
		assert_eq!(ok, json!({ "success": true, "data": { "name": "abc123" } }));

		let fail = serde_json::to_value(&Envelope {
			success: false,
			data: None,
			msg: Some("no profile with id 7".into()),
		})
		.unwrap();
		assert_eq!(fail, json!({ "success": false, "msg": "no profile with id 7" }));
	}

	#[test]
	fn pagination_clamps_and_slices() {
		let all: Vec<u32> = (0..7).collect();

		let (rows, page, page_size, total) = paginate(&all, 2, 3);
		assert_eq!(rows, [3, 4, 5]);
		assert_eq!((page, page_size, total), (2, 3, 7));

		// Page 0 is treated as page 1; past-the-end pages are empty.
		let (rows, page, ..) = paginate(&all, 0, 3);
		assert_eq!(rows, [0, 1, 2]);
		assert_eq!(page, 1);
		let (rows, ..) = paginate(&all, 9, 3);
		assert!(rows.is_empty());

		let (_, _, page_size, _) = paginate(&all, 1, 0);
		assert_eq!(page_size, 1);
	}

	#[test]
	fn list_request_defaults_apply() {
		let req: ListRequest = serde_json::from_value(json!({})).unwrap();
		assert_eq!(req.page, 1);
		assert_eq!(req.page_size, 50);
		assert!(req.group.is_none());
	}
}
