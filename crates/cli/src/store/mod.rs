//! JSON-file catalog of profiles, groups and proxies.
//!
//! The catalog is the durable half of the system: profile records,
//! their group/proxy references and the location of each profile's
//! user-data directory. Live session state never touches this file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use burrow_core::{Profile, ProxySpec, profile};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEntry {
	pub id: u64,
	pub name: String,
	pub group_id: Option<u64>,
	pub proxy_id: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEntry {
	pub id: u64,
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub remark: Option<String>,
}

/// A stored upstream proxy. `url` is the full spec including any
/// credentials; display paths must strip it via [`ProxySpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEntry {
	pub id: u64,
	pub url: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub remark: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogData {
	next_id: u64,
	profiles: Vec<ProfileEntry>,
	groups: Vec<GroupEntry>,
	proxies: Vec<ProxyEntry>,
}

/// On-disk catalog plus its load/save cycle.
///
/// Mutating operations only touch memory; callers persist explicitly
/// with [`CatalogStore::save`] once a command's changes are complete.
pub struct CatalogStore {
	path: PathBuf,
	data: CatalogData,
}

impl CatalogStore {
	/// Opens the catalog at `path`, starting empty if the file does not
	/// exist yet.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
		let path = path.into();
		let data = if path.exists() {
			let raw = fs::read_to_string(&path)
				.with_context(|| format!("failed to read catalog at {}", path.display()))?;
			serde_json::from_str(&raw)
				.with_context(|| format!("catalog at {} is not valid JSON", path.display()))?
		} else {
			CatalogData::default()
		};
		Ok(Self { path, data })
	}

	/// Opens the catalog at the platform data directory.
	pub fn open_default() -> Result<Self> {
		Self::open(default_data_dir()?.join("catalog.json"))
	}

	/// Writes the catalog back to disk, creating parent directories as
	/// needed.
	pub fn save(&self) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)
				.with_context(|| format!("failed to create {}", parent.display()))?;
		}
		let raw = serde_json::to_string_pretty(&self.data).context("failed to serialize catalog")?;
		fs::write(&self.path, raw)
			.with_context(|| format!("failed to write catalog at {}", self.path.display()))?;
		debug!(target = "burrow.store", path = %self.path.display(), "catalog saved");
		Ok(())
	}

	/// Root directory under which per-profile user-data directories
	/// live, a sibling of the catalog file.
	pub fn profiles_root(&self) -> PathBuf {
		self.path
			.parent()
			.map(Path::to_path_buf)
			.unwrap_or_else(|| PathBuf::from("."))
			.join("profiles")
	}

	fn alloc_id(&mut self) -> u64 {
		self.data.next_id += 1;
		self.data.next_id
	}

	// ---- profiles ----

	/// Resolved profile views, optionally filtered by group name. An
	/// unknown group filter matches nothing.
	pub fn list_profiles(&self, group: Option<&str>) -> Vec<Profile> {
		let profiles = self.data.profiles.iter();
		match group {
			None => profiles.map(|p| self.resolve(p)).collect(),
			Some(name) => match self.group_by_name(name) {
				Some(entry) => {
					let id = entry.id;
					profiles
						.filter(|p| p.group_id == Some(id))
						.map(|p| self.resolve(p))
						.collect()
				}
				None => Vec::new(),
			},
		}
	}

	pub fn profile_by_name(&self, name: &str) -> Option<Profile> {
		self.data.profiles.iter().find(|p| p.name == name).map(|p| self.resolve(p))
	}

	pub fn profile_by_id(&self, id: u64) -> Option<Profile> {
		self.data.profiles.iter().find(|p| p.id == id).map(|p| self.resolve(p))
	}

	/// Adds one profile after validating the name and resolving group
	/// and proxy references.
	pub fn add_profile(
		&mut self,
		name: &str,
		group: Option<&str>,
		proxy: Option<&str>,
		remark: Option<&str>,
	) -> Result<Profile> {
		profile::validate_name(name)?;
		if self.profile_by_name(name).is_some() {
			bail!("profile {name:?} already exists");
		}
		let group_id = self.require_group(group)?;
		let proxy_id = self.require_proxy(proxy)?;

		let entry = ProfileEntry {
			id: self.alloc_id(),
			name: name.to_string(),
			group_id,
			proxy_id,
			remark: remark.map(str::to_string),
		};
		let view = self.resolve(&entry);
		self.data.profiles.push(entry);
		Ok(view)
	}

	/// Adds `count` profiles with generated names, all sharing the same
	/// group and proxy references. Returns the names created.
	pub fn bulk_add_profiles(
		&mut self,
		count: usize,
		group: Option<&str>,
		proxy: Option<&str>,
	) -> Result<Vec<String>> {
		let group_id = self.require_group(group)?;
		let proxy_id = self.require_proxy(proxy)?;

		let existing: HashSet<String> = self.data.profiles.iter().map(|p| p.name.clone()).collect();
		let names = profile::generate_unique_names(count, &existing)?;
		for name in &names {
			let entry = ProfileEntry {
				id: self.alloc_id(),
				name: name.clone(),
				group_id,
				proxy_id,
				remark: None,
			};
			self.data.profiles.push(entry);
		}
		Ok(names)
	}

	/// Re-points an existing profile's group/proxy/remark. `Some("")`
	/// for group or proxy clears the reference.
	pub fn update_profile(
		&mut self,
		name: &str,
		group: Option<&str>,
		proxy: Option<&str>,
		remark: Option<&str>,
	) -> Result<Profile> {
		let group_id = match group {
			Some("") => Some(None),
			Some(g) => Some(self.require_group(Some(g))?),
			None => None,
		};
		let proxy_id = match proxy {
			Some("") => Some(None),
			Some(p) => Some(self.require_proxy(Some(p))?),
			None => None,
		};

		let Some(entry) = self.data.profiles.iter_mut().find(|p| p.name == name) else {
			bail!("profile {name:?} not found");
		};
		if let Some(group_id) = group_id {
			entry.group_id = group_id;
		}
		if let Some(proxy_id) = proxy_id {
			entry.proxy_id = proxy_id;
		}
		if let Some(remark) = remark {
			entry.remark = if remark.is_empty() { None } else { Some(remark.to_string()) };
		}
		let entry = entry.clone();
		Ok(self.resolve(&entry))
	}

	pub fn remove_profile(&mut self, name: &str) -> Result<()> {
		let before = self.data.profiles.len();
		self.data.profiles.retain(|p| p.name != name);
		if self.data.profiles.len() == before {
			bail!("profile {name:?} not found");
		}
		Ok(())
	}

	fn resolve(&self, entry: &ProfileEntry) -> Profile {
		Profile {
			id: entry.id,
			name: entry.name.clone(),
			group_name: entry
				.group_id
				.and_then(|id| self.data.groups.iter().find(|g| g.id == id))
				.map(|g| g.name.clone()),
			proxy_name: entry
				.proxy_id
				.and_then(|id| self.data.proxies.iter().find(|p| p.id == id))
				.map(|p| p.url.clone()),
			remark: entry.remark.clone(),
		}
	}

	fn require_group(&self, group: Option<&str>) -> Result<Option<u64>> {
		match group {
			Some(name) => match self.group_by_name(name) {
				Some(entry) => Ok(Some(entry.id)),
				None => bail!("group {name:?} not found"),
			},
			None => Ok(None),
		}
	}

	fn require_proxy(&self, proxy: Option<&str>) -> Result<Option<u64>> {
		match proxy {
			Some(url) => match self.data.proxies.iter().find(|p| p.url == url) {
				Some(entry) => Ok(Some(entry.id)),
				None => bail!("proxy {url:?} not found"),
			},
			None => Ok(None),
		}
	}

	// ---- groups ----

	pub fn list_groups(&self) -> &[GroupEntry] {
		&self.data.groups
	}

	fn group_by_name(&self, name: &str) -> Option<&GroupEntry> {
		self.data.groups.iter().find(|g| g.name == name)
	}

	pub fn add_group(&mut self, name: &str, remark: Option<&str>) -> Result<()> {
		if self.group_by_name(name).is_some() {
			bail!("group {name:?} already exists");
		}
		let entry = GroupEntry {
			id: self.alloc_id(),
			name: name.to_string(),
			remark: remark.map(str::to_string),
		};
		self.data.groups.push(entry);
		Ok(())
	}

	/// Removes a group and clears the reference on any profile that
	/// pointed at it; those profiles become ungrouped.
	pub fn remove_group(&mut self, name: &str) -> Result<()> {
		let Some(id) = self.group_by_name(name).map(|g| g.id) else {
			bail!("group {name:?} not found");
		};
		self.data.groups.retain(|g| g.id != id);
		for profile in &mut self.data.profiles {
			if profile.group_id == Some(id) {
				profile.group_id = None;
			}
		}
		Ok(())
	}

	// ---- proxies ----

	pub fn list_proxies(&self) -> &[ProxyEntry] {
		&self.data.proxies
	}

	/// Stores a proxy after validating it parses as a [`ProxySpec`].
	pub fn add_proxy(&mut self, url: &str, remark: Option<&str>) -> Result<ProxySpec> {
		let spec: ProxySpec = url.parse()?;
		if self.data.proxies.iter().any(|p| p.url == url) {
			bail!("proxy {url:?} already exists");
		}
		let entry = ProxyEntry {
			id: self.alloc_id(),
			url: url.to_string(),
			remark: remark.map(str::to_string),
		};
		self.data.proxies.push(entry);
		Ok(spec)
	}

	/// Removes a proxy and clears the reference on any profile that
	/// pointed at it; those profiles launch direct from then on.
	pub fn remove_proxy(&mut self, url: &str) -> Result<()> {
		let Some(id) = self.data.proxies.iter().find(|p| p.url == url).map(|p| p.id) else {
			bail!("proxy {url:?} not found");
		};
		self.data.proxies.retain(|p| p.id != id);
		for profile in &mut self.data.profiles {
			if profile.proxy_id == Some(id) {
				profile.proxy_id = None;
			}
		}
		Ok(())
	}

	pub fn proxy_by_url(&self, url: &str) -> Option<&ProxyEntry> {
		self.data.proxies.iter().find(|p| p.url == url)
	}
}

fn default_data_dir() -> Result<PathBuf> {
	Ok(dirs::data_dir()
		.context("could not determine the platform data directory")?
		.join("burrow"))
}
