//! # Core Service
//!
//! Top-level façade of the orchestrator: the [`Dispatcher`] owns the
//! registry of group sessions and every service they share.
//!
//! ## Overview
//!
//! ```text
//!            chat collaborator                      voice backend
//!                  │ commands                            ▲  │ callbacks
//!                  v                                     │  v
//!  ┌──────────────────────────────┐  join/pause/leave  ┌─┴──────────────┐
//!  │ Dispatcher                   │───────────────────>│ VoiceBackend   │
//!  │  registry: group -> Session  │                    └────────────────┘
//!  │  Resolver (cache + pool)     │  extract           ┌────────────────┐
//!  │  PerformanceMonitor          │───────────────────>│ Extractor      │
//!  │  EventBus                    │                    └────────────────┘
//!  └──────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use core_service::Dispatcher;
//! use core_playback::Requester;
//!
//! let dispatcher = Dispatcher::new(config, extractor, backend)?;
//! dispatcher.listen_backend(backend_events);
//!
//! let reply = dispatcher
//!     .play(group, "https://youtu.be/dQw4w9WgXcQ", Requester::user(42))
//!     .await;
//! match reply {
//!     Ok(reply) => println!("{}", reply),
//!     Err(err) => println!("{}", err),
//! }
//!
//! dispatcher.shutdown().await;
//! ```

pub mod dispatcher;
pub mod error;
pub mod health;

pub use dispatcher::Dispatcher;
pub use error::{CoreError, Result};
pub use health::{HealthReport, HealthStatus, MaintenanceReport, PoolStats};
