//! # Collaborator Bridge Traits
//!
//! Contracts between the playback orchestrator and the systems it drives.
//!
//! ## Overview
//!
//! The orchestrator owns sessions, queues and scheduling. Everything that
//! touches the outside world is a collaborator implemented by the host
//! application:
//!
//! | Trait | Responsibility |
//! |-------|----------------|
//! | [`Extractor`](extract::Extractor) | Turn a track reference into playable metadata |
//! | [`VoiceBackend`](voice::VoiceBackend) | Join group voice chats and stream audio |
//!
//! The voice backend reports asynchronous outcomes (track finished, stream
//! failed) as [`BackendEvent`](voice::BackendEvent)s that the host forwards
//! into the orchestrator.
//!
//! ## Thread Safety
//!
//! Both traits require `Send + Sync`. The orchestrator calls them from many
//! session tasks at once, so implementations must tolerate concurrent use.
//!
//! ## Example
//!
//! ```ignore
//! use async_trait::async_trait;
//! use bridge_traits::{ExtractError, Extractor, ResolvedMetadata, StreamHandle};
//! use std::time::Duration;
//!
//! struct StaticExtractor;
//!
//! #[async_trait]
//! impl Extractor for StaticExtractor {
//!     async fn extract(&self, source: &str) -> Result<ResolvedMetadata, ExtractError> {
//!         Ok(ResolvedMetadata::new(source, Duration::from_secs(180), StreamHandle::new(source)))
//!     }
//! }
//! ```

pub mod error;
pub mod extract;
pub mod ids;
pub mod voice;

pub use error::BridgeError;

pub use extract::{ExtractError, Extractor, ResolvedMetadata, StreamHandle};
pub use ids::{GroupId, UserId};
pub use voice::{BackendEvent, JoinError, VoiceBackend};
