//! # Session State Machine
//!
//! One session per group. Each session is a tokio task consuming a private
//! ordered channel, so every mutation of its queue and state happens on a
//! single control loop, one event at a time:
//!
//! ```text
//!  SessionHandle ──Command──┐
//!  backend pump ──Backend───┤      ┌────────────────────────┐
//!  resolution task ─────────┼─────>│ SessionRunner (1 task) │──> VoiceBackend
//!  join task ───────────────┤ mpsc │  Queue + SessionState  │──> EventBus
//!  registry tick ──Evict────┘      └──────────┬─────────────┘
//!                                             └─watch──> SessionStatus
//! ```
//!
//! Resolver calls and backend joins never run on the loop itself. They are
//! spawned and report back as `Resolved` / `JoinFinished` events tagged with
//! the track id (and for joins, a generation bumped on every head drop), so
//! results for tracks that have since left the queue are discarded.

mod command;
mod handle;
mod runner;
mod state;

pub use command::Command;
pub use handle::SessionHandle;
pub use state::{SessionState, SessionStatus};

use bridge_traits::VoiceBackend;
use core_resolver::Resolver;
use core_runtime::config::{OrchestratorConfig, RetryPolicy};
use core_runtime::events::EventBus;
use core_runtime::metrics::PerformanceMonitor;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Buffered events per session before senders wait.
pub const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Per-session tunables taken from [`OrchestratorConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_queue_length: usize,
    /// Per join attempt, and for pause/resume/leave calls.
    pub backend_timeout: Duration,
    pub join_retry: RetryPolicy,
    pub channel_capacity: usize,
}

impl From<&OrchestratorConfig> for SessionSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_queue_length: config.max_queue_length,
            backend_timeout: config.backend_join_timeout,
            join_retry: config.backend_join_retry_policy(),
            channel_capacity: SESSION_CHANNEL_CAPACITY,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// Shared services every session holds a reference to.
#[derive(Clone)]
pub struct SessionContext {
    pub resolver: Arc<Resolver>,
    pub backend: Arc<dyn VoiceBackend>,
    pub events: EventBus,
    pub metrics: Arc<PerformanceMonitor>,
    pub settings: SessionSettings,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("resolver", &self.resolver)
            .field("events", &self.events)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
