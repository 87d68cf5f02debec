//! Voice backend contract.
//!
//! The voice backend owns the actual voice-chat transport: joining a group
//! call, streaming audio from a [`StreamHandle`], and reporting back when a
//! stream finishes or breaks. The core never touches audio; it only issues
//! the calls below and consumes [`BackendEvent`]s.

use crate::error::Result;
use crate::extract::StreamHandle;
use crate::ids::GroupId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures from [`VoiceBackend::join_and_stream`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// The group has no voice chat running, so there is nothing to join.
    #[error("No active voice chat in this group")]
    NoActiveCall,

    /// The join did not complete in time.
    #[error("Joining the voice chat timed out")]
    Timeout,

    /// Any other transport failure.
    #[error("Voice backend error: {0}")]
    Backend(String),
}

impl JoinError {
    /// Returns `true` if repeating the join may succeed.
    ///
    /// A missing voice chat needs a human to start one first.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JoinError::NoActiveCall)
    }
}

/// Streaming backend for group voice chats.
///
/// `join_and_stream` is used both for the first track of a play cycle and
/// for every following track: when the backend is already in the call it
/// must switch the running stream instead of failing. An "already joined"
/// condition is therefore a success.
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    /// Join the group's voice chat (if needed) and start streaming `stream`.
    async fn join_and_stream(&self, group: GroupId, stream: &StreamHandle)
        -> std::result::Result<(), JoinError>;

    /// Hold the current stream.
    async fn pause(&self, group: GroupId) -> Result<()>;

    /// Continue a held stream.
    async fn resume(&self, group: GroupId) -> Result<()>;

    /// Stop streaming and leave the voice chat.
    async fn leave(&self, group: GroupId) -> Result<()>;
}

/// Callbacks from the voice backend into the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum BackendEvent {
    /// The current stream reached its end.
    TrackEnded { group_id: GroupId },
    /// The current stream failed mid-playback.
    Error { group_id: GroupId, message: String },
}

impl BackendEvent {
    pub fn group_id(&self) -> GroupId {
        match self {
            BackendEvent::TrackEnded { group_id } | BackendEvent::Error { group_id, .. } => {
                *group_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_error_retryability() {
        assert!(!JoinError::NoActiveCall.is_retryable());
        assert!(JoinError::Timeout.is_retryable());
        assert!(JoinError::Backend("socket closed".into()).is_retryable());
    }

    #[test]
    fn test_backend_event_group_id() {
        let group = GroupId::new(-42);
        assert_eq!(BackendEvent::TrackEnded { group_id: group }.group_id(), group);
        let err = BackendEvent::Error {
            group_id: group,
            message: "ffmpeg exited".into(),
        };
        assert_eq!(err.group_id(), group);
    }

    #[test]
    fn test_backend_event_serialization() {
        let event = BackendEvent::TrackEnded {
            group_id: GroupId::new(5),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"TrackEnded","group_id":5}"#);
    }
}
