//! Extraction collaborator contract.
//!
//! An [`Extractor`] turns a user-supplied track reference (a URL or a free
//! text search query) into playable metadata. The returned [`StreamHandle`]
//! is opaque to the core: it is handed to the voice backend untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Opaque handle the voice backend knows how to stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamHandle(String);

impl StreamHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata produced by a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMetadata {
    /// Display title.
    pub title: String,
    /// Track length. Zero for live streams or when unknown.
    pub duration: Duration,
    /// Playable stream handle.
    pub stream: StreamHandle,
    /// Channel or artist that published the media, when known.
    pub uploader: Option<String>,
    /// Thumbnail URL, when known.
    pub thumbnail: Option<String>,
    /// Canonical page for the media, when known.
    pub webpage_url: Option<String>,
}

impl ResolvedMetadata {
    pub fn new(title: impl Into<String>, duration: Duration, stream: StreamHandle) -> Self {
        Self {
            title: title.into(),
            duration,
            stream,
            uploader: None,
            thumbnail: None,
            webpage_url: None,
        }
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_webpage_url(mut self, url: impl Into<String>) -> Self {
        self.webpage_url = Some(url.into());
        self
    }
}

/// Failures reported by an extraction collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// Nothing matched the reference (dead link, empty search).
    #[error("No media found for: {0}")]
    NotFound(String),

    /// The reference points at a site or format the extractor cannot handle.
    #[error("Unsupported source: {0}")]
    Unsupported(String),

    /// The upstream service failed; the call may succeed if repeated.
    #[error("Upstream extraction error: {0}")]
    Upstream(String),
}

/// Resolves track references into playable metadata.
///
/// Implementations talk to the upstream extraction service (for example a
/// `yt-dlp` wrapper). Playlist references should resolve to their first
/// entry. Implementations must be safe to call concurrently; the core bounds
/// how many calls are in flight at once.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract metadata for `source`.
    async fn extract(&self, source: &str) -> Result<ResolvedMetadata, ExtractError>;
}
