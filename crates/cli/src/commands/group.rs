use anyhow::Result;

use crate::cli::GroupAction;
use crate::store::CatalogStore;

pub fn run(action: GroupAction) -> Result<()> {
	let mut store = CatalogStore::open_default()?;
	match action {
		GroupAction::Add { name, remark } => {
			store.add_group(&name, remark.as_deref())?;
			store.save()?;
			println!("created group {name}");
		}
		GroupAction::Rm { name } => {
			store.remove_group(&name)?;
			store.save()?;
			println!("removed group {name}");
		}
		GroupAction::Ls => {
			let groups = store.list_groups();
			if groups.is_empty() {
				println!("no groups");
				return Ok(());
			}
			println!("{:<6} {:<16} {}", "ID", "NAME", "REMARK");
			for group in groups {
				println!(
					"{:<6} {:<16} {}",
					group.id,
					group.name,
					group.remark.as_deref().unwrap_or(""),
				);
			}
		}
	}
	Ok(())
}
