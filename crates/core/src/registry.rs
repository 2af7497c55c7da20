//! Authoritative in-memory view of running sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Observable state of one profile's session.
///
/// Names absent from the registry are implicitly idle. `loading` means
/// a transition (open or close) was requested and the confirming
/// notification has not arrived yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pid: Option<u32>,
	pub running: bool,
	pub loading: bool,
}

/// Mutex-guarded map of profile name to [`SessionStatus`].
///
/// Every mutation goes through one of the named operations below and
/// publishes a fresh sorted snapshot on the watch channel, so observers
/// (the UI boundary) always see a consistent collection and concurrent
/// intents can never interleave into a half-updated entry.
#[derive(Clone)]
pub struct SessionRegistry {
	inner: Arc<Mutex<HashMap<String, SessionStatus>>>,
	snapshot_tx: Arc<watch::Sender<Vec<SessionStatus>>>,
}

impl Default for SessionRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl SessionRegistry {
	pub fn new() -> Self {
		let (snapshot_tx, _) = watch::channel(Vec::new());
		Self {
			inner: Arc::new(Mutex::new(HashMap::new())),
			snapshot_tx: Arc::new(snapshot_tx),
		}
	}

	/// Subscribes to snapshot updates published after every mutation.
	pub fn subscribe(&self) -> watch::Receiver<Vec<SessionStatus>> {
		self.snapshot_tx.subscribe()
	}

	/// Marks the given names as loading.
	///
	/// Opening inserts a fresh `{running: false, loading: true}` entry
	/// only where none exists, so a confirmed running session is never
	/// clobbered by a late open intent. Closing flips `loading` on
	/// entries that are actually running; an entry still waiting on its
	/// open confirmation is left untouched, which keeps open and close
	/// loading states mutually exclusive for a name.
	pub fn upsert_loading<S: AsRef<str>>(&self, names: &[S], intended_open: bool) {
		let mut map = self.lock();
		for name in names {
			let name = name.as_ref();
			if intended_open {
				map.entry(name.to_string()).or_insert_with(|| SessionStatus {
					name: name.to_string(),
					pid: None,
					running: false,
					loading: true,
				});
			} else if let Some(entry) = map.get_mut(name) {
				if entry.running {
					entry.loading = true;
				}
			}
		}
		self.publish(&map);
	}

	/// Applies a start confirmation, creating the entry if the session
	/// was started outside this instance.
	pub fn confirm_started(&self, name: &str, pid: u32) {
		let mut map = self.lock();
		let entry = map.entry(name.to_string()).or_insert_with(|| SessionStatus {
			name: name.to_string(),
			pid: None,
			running: false,
			loading: false,
		});
		entry.pid = Some(pid);
		entry.running = true;
		entry.loading = false;
		self.publish(&map);
	}

	/// Removes every entry with the given pid. Returns whether anything
	/// was removed; a second delivery for the same pid is a no-op.
	pub fn confirm_closed(&self, pid: u32) -> bool {
		let mut map = self.lock();
		let before = map.len();
		map.retain(|_, status| status.pid != Some(pid));
		let removed = map.len() != before;
		if !removed {
			debug!(target = "burrow.registry", pid, "close confirmation for untracked pid");
		}
		self.publish(&map);
		removed
	}

	/// Removes a pending entry after a launch failed before any process
	/// existed.
	pub fn abort_launch(&self, name: &str) {
		let mut map = self.lock();
		map.remove(name);
		self.publish(&map);
	}

	/// Consistent read of the full collection, sorted by name.
	pub fn snapshot(&self) -> Vec<SessionStatus> {
		let map = self.lock();
		Self::sorted(&map)
	}

	/// Looks up a single entry by name.
	pub fn get(&self, name: &str) -> Option<SessionStatus> {
		self.lock().get(name).cloned()
	}

	/// Replaces tracked state from a fresh live-session query. Used at
	/// startup; the registry itself is never persisted.
	pub fn resync(&self, live: Vec<(String, u32)>) {
		let mut map = self.lock();
		map.clear();
		for (name, pid) in live {
			map.insert(
				name.clone(),
				SessionStatus {
					name,
					pid: Some(pid),
					running: true,
					loading: false,
				},
			);
		}
		self.publish(&map);
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionStatus>> {
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn publish(&self, map: &HashMap<String, SessionStatus>) {
		let _ = self.snapshot_tx.send(Self::sorted(map));
	}

	fn sorted(map: &HashMap<String, SessionStatus>) -> Vec<SessionStatus> {
		let mut rows: Vec<SessionStatus> = map.values().cloned().collect();
		rows.sort_by(|a, b| a.name.cmp(&b.name));
		rows
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn names(reg: &SessionRegistry) -> Vec<String> {
		reg.snapshot().into_iter().map(|s| s.name).collect()
	}

	#[test]
	fn open_loading_inserts_once() {
		let reg = SessionRegistry::new();
		reg.upsert_loading(&["a", "b"], true);
		reg.upsert_loading(&["a"], true);
		assert_eq!(names(&reg), vec!["a", "b"]);
		let a = reg.get("a").unwrap();
		assert!(a.loading && !a.running);
	}

	#[test]
	fn open_loading_does_not_clobber_running() {
		let reg = SessionRegistry::new();
		reg.confirm_started("a", 42);
		reg.upsert_loading(&["a"], true);
		let a = reg.get("a").unwrap();
		assert!(a.running);
		assert_eq!(a.pid, Some(42));
		assert!(!a.loading);
	}

	#[test]
	fn close_loading_preserves_pid_and_running() {
		let reg = SessionRegistry::new();
		reg.confirm_started("a", 42);
		reg.upsert_loading(&["a"], false);
		let a = reg.get("a").unwrap();
		assert!(a.running && a.loading);
		assert_eq!(a.pid, Some(42));
	}

	#[test]
	fn close_loading_ignores_unknown_names() {
		let reg = SessionRegistry::new();
		reg.upsert_loading(&["ghost"], false);
		assert!(reg.snapshot().is_empty());
	}

	#[test]
	fn loading_states_are_mutually_exclusive() {
		// A name still waiting on its open confirmation must not pick
		// up close semantics from a concurrent close intent.
		let reg = SessionRegistry::new();
		reg.upsert_loading(&["a"], true);
		reg.upsert_loading(&["a"], false);
		let a = reg.get("a").unwrap();
		assert!(a.loading && !a.running && a.pid.is_none());
	}

	#[test]
	fn confirm_started_resolves_loading() {
		let reg = SessionRegistry::new();
		reg.upsert_loading(&["a"], true);
		reg.confirm_started("a", 7);
		let a = reg.get("a").unwrap();
		assert!(a.running && !a.loading);
		assert_eq!(a.pid, Some(7));
	}

	#[test]
	fn confirm_closed_is_idempotent() {
		let reg = SessionRegistry::new();
		reg.confirm_started("a", 7);
		assert!(reg.confirm_closed(7));
		let after_first = reg.snapshot();
		assert!(!reg.confirm_closed(7));
		assert_eq!(reg.snapshot(), after_first);
		assert!(after_first.is_empty());
	}

	#[test]
	fn abort_launch_removes_entry() {
		let reg = SessionRegistry::new();
		reg.upsert_loading(&["a"], true);
		reg.abort_launch("a");
		assert!(reg.snapshot().is_empty());
	}

	#[test]
	fn resync_replaces_state() {
		let reg = SessionRegistry::new();
		reg.upsert_loading(&["stale"], true);
		reg.resync(vec![("x".into(), 1), ("y".into(), 2)]);
		assert_eq!(names(&reg), vec!["x", "y"]);
		assert!(reg.snapshot().iter().all(|s| s.running && !s.loading));
	}

	#[test]
	fn watch_publishes_after_mutation() {
		let reg = SessionRegistry::new();
		let rx = reg.subscribe();
		reg.confirm_started("a", 1);
		assert_eq!(rx.borrow().len(), 1);
		reg.confirm_closed(1);
		assert!(rx.borrow().is_empty());
	}
}
