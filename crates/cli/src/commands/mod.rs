mod group;
mod profile;
mod proxy;
mod serve;
mod session;

use anyhow::Result;

use crate::cli::{Cli, Commands};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let Cli {
		verbose: _,
		api_port,
		command,
	} = cli;

	match command {
		Commands::Profile(args) => profile::run(args.action),
		Commands::Group(args) => group::run(args.action),
		Commands::Proxy(args) => proxy::run(args.action).await,
		Commands::Open(args) => session::open(args, api_port).await,
		Commands::Close(args) => session::close(args, api_port).await,
		Commands::Status => session::status(api_port).await,
		Commands::Serve(args) => serve::run(args, api_port).await,
	}
}
