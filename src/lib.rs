//! Workspace facade crate.
//!
//! Re-exports the orchestrator crates behind feature flags so a host bot can
//! depend on `groupcast-workspace` alone:
//!
//! - `service` (default): the [`core_service`] dispatcher and everything it
//!   re-exports.
//! - `logging`: the [`core_runtime::logging`] setup helpers, for hosts that
//!   only want the shared tracing configuration.

#[cfg(feature = "service")]
pub use core_service;

#[cfg(feature = "logging")]
pub use core_runtime::logging;
