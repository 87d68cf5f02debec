//! # Track Resolution
//!
//! Resolves track references (URLs or search queries) into playable
//! metadata for every session in the process.
//!
//! ## Overview
//!
//! - [`Resolver`] runs the cache-check, bounded-concurrency extraction,
//!   timeout and retry pipeline.
//! - [`ResolutionCache`] is the shared TTL + LRU cache.
//! - [`WorkerPool`] caps concurrent extraction calls across all sessions.
//!
//! All three are meant to be created once and shared through `Arc`; sessions
//! never build their own.
//!
//! ## Usage
//!
//! ```ignore
//! use core_resolver::Resolver;
//! use core_runtime::{OrchestratorConfig, PerformanceMonitor};
//! use std::sync::Arc;
//!
//! let resolver = Arc::new(Resolver::new(
//!     Arc::new(MyExtractor::default()),
//!     &OrchestratorConfig::default(),
//!     Arc::new(PerformanceMonitor::new()),
//! ));
//! let metadata = resolver.resolve("https://youtu.be/dQw4w9WgXcQ").await?;
//! ```

pub mod cache;
pub mod error;
pub mod pool;
pub mod resolver;

pub use cache::{CacheStats, ResolutionCache};
pub use error::{ResolutionError, Result};
pub use pool::{WorkerPermit, WorkerPool};
pub use resolver::Resolver;
