use std::fs;

use anyhow::{Context, Result};
use burrow_core::ProxySpec;

use crate::cli::ProfileAction;
use crate::store::CatalogStore;

pub fn run(action: ProfileAction) -> Result<()> {
	let mut store = CatalogStore::open_default()?;
	match action {
		ProfileAction::Add {
			name,
			group,
			proxy,
			remark,
		} => {
			store.add_profile(&name, group.as_deref(), proxy.as_deref(), remark.as_deref())?;
			create_user_dir(&store, &name)?;
			store.save()?;
			println!("created profile {name}");
		}
		ProfileAction::BulkAdd { count, group, proxy } => {
			let names = store.bulk_add_profiles(count, group.as_deref(), proxy.as_deref())?;
			for name in &names {
				create_user_dir(&store, name)?;
			}
			store.save()?;
			println!("created {} profiles: {}", names.len(), names.join(" "));
		}
		ProfileAction::Update {
			name,
			group,
			proxy,
			remark,
		} => {
			store.update_profile(&name, group.as_deref(), proxy.as_deref(), remark.as_deref())?;
			store.save()?;
			println!("updated profile {name}");
		}
		ProfileAction::Rm { names } => {
			for name in &names {
				store.remove_profile(name)?;
				let dir = store.profiles_root().join(name);
				if dir.exists() {
					fs::remove_dir_all(&dir)
						.with_context(|| format!("failed to remove {}", dir.display()))?;
				}
			}
			store.save()?;
			println!("removed {} profile(s)", names.len());
		}
		ProfileAction::Ls { group } => {
			let rows = store.list_profiles(group.as_deref());
			if rows.is_empty() {
				println!("no profiles");
				return Ok(());
			}
			println!("{:<6} {:<12} {:<12} {:<28} {}", "ID", "NAME", "GROUP", "PROXY", "REMARK");
			for row in rows {
				println!(
					"{:<6} {:<12} {:<12} {:<28} {}",
					row.id,
					row.name,
					row.group_name.as_deref().unwrap_or("-"),
					display_proxy(row.proxy_name.as_deref()),
					row.remark.as_deref().unwrap_or(""),
				);
			}
		}
	}
	Ok(())
}

fn create_user_dir(store: &CatalogStore, name: &str) -> Result<()> {
	let dir = store.profiles_root().join(name);
	fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))
}

/// Stored proxies are validated on entry, so the parse only fails on a
/// hand-edited catalog; show the raw string in that case rather than
/// hiding the row.
fn display_proxy(proxy: Option<&str>) -> String {
	match proxy {
		Some(raw) => raw
			.parse::<ProxySpec>()
			.map(|spec| spec.to_string())
			.unwrap_or_else(|_| raw.to_string()),
		None => "-".to_string(),
	}
}
