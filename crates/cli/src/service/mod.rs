//! Real process and relay services behind the orchestration core.

pub mod process;
pub mod relay;

pub use process::{LocalSessionService, ServiceConfig};
pub use relay::RelayManager;
