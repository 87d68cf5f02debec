//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the playback orchestrator:
//! - Logging and tracing infrastructure
//! - Configuration management and retry policies
//! - Event bus system
//! - Latency metrics
//!
//! ## Overview
//!
//! Every other core crate depends on this one. It fixes the logging
//! conventions, the tunables shared across sessions, and the broadcast
//! channel sessions use to report what happened after a reply was sent.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;

pub use config::{Backoff, OrchestratorConfig, RetryPolicy};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
pub use metrics::{MetricKind, PerformanceMonitor};
