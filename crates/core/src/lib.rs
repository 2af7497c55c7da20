//! Session orchestration core for isolated browser-profile sandboxes.
//!
//! This crate owns the live view of "which profiles currently have a
//! running external process" and the workflows that mutate it: the
//! [`SessionRegistry`] (authoritative in-memory state), the
//! [`Coordinator`] (launch/close intents, bulk fan-out, relay
//! provisioning) and the [`Reconciler`] (applies asynchronous
//! ground-truth notifications back onto the registry). All I/O is
//! behind the [`SessionService`] trait so the whole core is testable
//! against a fake service.

pub mod coordinator;
pub mod error;
pub mod profile;
pub mod proxy;
pub mod reconciler;
pub mod registry;
pub mod service;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{Error, Result};
pub use profile::Profile;
pub use proxy::{ProxyAuth, ProxyProtocol, ProxySpec};
pub use reconciler::{Reconciler, SessionEvent};
pub use registry::{SessionRegistry, SessionStatus};
pub use service::{RelayInfo, RunningSession, SessionService};
