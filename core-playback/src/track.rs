//! # Tracks
//!
//! One queued media reference plus its resolution lifecycle.
//!
//! ```text
//! Unresolved ──> Resolving ──┬──> Resolved
//!                            └──> Failed
//! ```
//!
//! Status only moves forward. The transition methods return `false` and
//! leave the track untouched when asked to move backward or sideways, so a
//! late resolution result can never resurrect a failed track or overwrite a
//! resolved one.

use bridge_traits::{ResolvedMetadata, UserId};
use chrono::{DateTime, Utc};
use core_resolver::ResolutionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique identity of a queued track.
///
/// Two plays of the same source get different ids, so stale results can be
/// told apart from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who issued a command, as reported by the chat collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Requester {
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionStatus {
    Unresolved,
    Resolving,
    Resolved {
        metadata: ResolvedMetadata,
        resolved_at: DateTime<Utc>,
    },
    Failed(ResolutionError),
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Unresolved => "unresolved",
            ResolutionStatus::Resolving => "resolving",
            ResolutionStatus::Resolved { .. } => "resolved",
            ResolutionStatus::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    /// URL or search query as typed by the user.
    pub source: String,
    pub requested_by: Requester,
    pub requested_at: DateTime<Utc>,
    status: ResolutionStatus,
}

impl Track {
    pub fn new(source: impl Into<String>, requested_by: Requester) -> Self {
        Self {
            id: TrackId::new(),
            source: source.into(),
            requested_by,
            requested_at: Utc::now(),
            status: ResolutionStatus::Unresolved,
        }
    }

    pub fn status(&self) -> &ResolutionStatus {
        &self.status
    }

    /// `Unresolved -> Resolving`.
    pub fn begin_resolving(&mut self) -> bool {
        if matches!(self.status, ResolutionStatus::Unresolved) {
            self.status = ResolutionStatus::Resolving;
            true
        } else {
            false
        }
    }

    /// `Resolving -> Resolved`.
    pub fn mark_resolved(&mut self, metadata: ResolvedMetadata) -> bool {
        if matches!(self.status, ResolutionStatus::Resolving) {
            self.status = ResolutionStatus::Resolved {
                metadata,
                resolved_at: Utc::now(),
            };
            true
        } else {
            false
        }
    }

    /// `Resolving -> Failed`.
    pub fn mark_failed(&mut self, error: ResolutionError) -> bool {
        if matches!(self.status, ResolutionStatus::Resolving) {
            self.status = ResolutionStatus::Failed(error);
            true
        } else {
            false
        }
    }

    pub fn metadata(&self) -> Option<&ResolvedMetadata> {
        match &self.status {
            ResolutionStatus::Resolved { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.metadata().is_some()
    }

    /// Resolved title, or the raw source until resolution completes.
    pub fn title(&self) -> &str {
        self.metadata()
            .map(|m| m.title.as_str())
            .unwrap_or(&self.source)
    }

    pub fn summary(&self) -> TrackSummary {
        let metadata = self.metadata();
        TrackSummary {
            id: self.id,
            title: self.title().to_string(),
            source: self.source.clone(),
            duration: metadata.map(|m| m.duration),
            uploader: metadata.and_then(|m| m.uploader.clone()),
            requested_by: self.requested_by.user_id,
            status: self.status.as_str(),
        }
    }
}

/// Read-only view of a track for queue listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackSummary {
    pub id: TrackId,
    pub title: String,
    pub source: String,
    pub duration: Option<Duration>,
    pub uploader: Option<String>,
    pub requested_by: UserId,
    pub status: &'static str,
}
