//! CLI, local services and control API for burrow.
//!
//! The orchestration rules live in `burrow-core`; this crate supplies
//! everything that touches the outside world: the JSON catalog store,
//! the real process/relay service, the loopback control API and the
//! command surface.

pub mod api;
pub mod cli;
pub mod client;
pub mod commands;
pub mod logging;
pub mod service;
pub mod store;
