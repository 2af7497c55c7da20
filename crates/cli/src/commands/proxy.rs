use anyhow::Result;
use burrow_core::ProxySpec;

use crate::cli::ProxyAction;
use crate::service::relay;
use crate::store::CatalogStore;

pub async fn run(action: ProxyAction) -> Result<()> {
	let mut store = CatalogStore::open_default()?;
	match action {
		ProxyAction::Add { url, remark } => {
			let spec = store.add_proxy(&url, remark.as_deref())?;
			store.save()?;
			println!("stored proxy {spec}");
		}
		ProxyAction::Rm { url } => {
			store.remove_proxy(&url)?;
			store.save()?;
			println!("removed proxy");
		}
		ProxyAction::Ls => {
			let proxies = store.list_proxies();
			if proxies.is_empty() {
				println!("no proxies");
				return Ok(());
			}
			println!("{:<6} {:<32} {}", "ID", "PROXY", "REMARK");
			for proxy in proxies {
				// Credentials never reach the terminal.
				let shown = proxy
					.url
					.parse::<ProxySpec>()
					.map(|spec| spec.to_string())
					.unwrap_or_else(|_| proxy.url.clone());
				println!("{:<6} {:<32} {}", proxy.id, shown, proxy.remark.as_deref().unwrap_or(""));
			}
		}
		ProxyAction::Check { url } => {
			let spec: ProxySpec = url.parse()?;
			let latency = relay::probe(&spec).await?;
			println!("{spec} ok ({} ms)", latency.as_millis());
		}
	}
	Ok(())
}
