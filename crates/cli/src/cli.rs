//! Command-line surface.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::api::DEFAULT_API_PORT;

#[derive(Debug, Parser)]
#[command(name = "burrow", version, about = "Isolated browser profile sandboxes with per-session proxy relays")]
pub struct Cli {
	/// Increase log verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = ArgAction::Count)]
	pub verbose: u8,

	/// Control API port (bound by `serve`, dialed by everything else)
	#[arg(long, global = true, default_value_t = DEFAULT_API_PORT)]
	pub api_port: u16,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
	/// Manage profile records
	Profile(ProfileArgs),
	/// Manage profile groups
	Group(GroupArgs),
	/// Manage upstream proxies
	Proxy(ProxyArgs),
	/// Open sessions for the named profiles
	Open(OpenArgs),
	/// Close the named profiles' running sessions
	Close(CloseArgs),
	/// Show live session state
	Status,
	/// Run the orchestrator and control API in the foreground
	Serve(ServeArgs),
}

#[derive(Debug, Args)]
pub struct ProfileArgs {
	#[command(subcommand)]
	pub action: ProfileAction,
}

#[derive(Debug, Subcommand)]
pub enum ProfileAction {
	/// Create one profile
	Add {
		name: String,
		#[arg(long)]
		group: Option<String>,
		#[arg(long)]
		proxy: Option<String>,
		#[arg(long)]
		remark: Option<String>,
	},
	/// Create many profiles with generated names
	BulkAdd {
		count: usize,
		#[arg(long)]
		group: Option<String>,
		#[arg(long)]
		proxy: Option<String>,
	},
	/// Re-point a profile's group, proxy or remark (empty string clears)
	Update {
		name: String,
		#[arg(long)]
		group: Option<String>,
		#[arg(long)]
		proxy: Option<String>,
		#[arg(long)]
		remark: Option<String>,
	},
	/// Delete profiles and their user-data directories
	Rm {
		#[arg(required = true)]
		names: Vec<String>,
	},
	/// List profiles
	Ls {
		#[arg(long)]
		group: Option<String>,
	},
}

#[derive(Debug, Args)]
pub struct GroupArgs {
	#[command(subcommand)]
	pub action: GroupAction,
}

#[derive(Debug, Subcommand)]
pub enum GroupAction {
	Add {
		name: String,
		#[arg(long)]
		remark: Option<String>,
	},
	Rm {
		name: String,
	},
	Ls,
}

#[derive(Debug, Args)]
pub struct ProxyArgs {
	#[command(subcommand)]
	pub action: ProxyAction,
}

#[derive(Debug, Subcommand)]
pub enum ProxyAction {
	/// Store a proxy of the form protocol://[user:pass@]host:port
	Add {
		url: String,
		#[arg(long)]
		remark: Option<String>,
	},
	Rm {
		url: String,
	},
	Ls,
	/// Dial a proxy end to end and report the latency
	Check {
		url: String,
	},
}

#[derive(Debug, Args)]
pub struct OpenArgs {
	#[arg(required = true)]
	pub names: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CloseArgs {
	#[arg(required = true)]
	pub names: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
	/// Abort a launch if the session has not confirmed within this many
	/// seconds
	#[arg(long)]
	pub loading_timeout: Option<u64>,

	/// Browser binary to launch instead of searching for one
	#[arg(long)]
	pub browser_path: Option<PathBuf>,

	/// Directory for the catalog and profile data (defaults to the
	/// platform data directory)
	#[arg(long)]
	pub data_dir: Option<PathBuf>,
}
