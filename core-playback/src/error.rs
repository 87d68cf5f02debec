//! # Playback Error Types
//!
//! Everything a session command can answer with instead of a [`Reply`].
//!
//! The `Display` text of each variant is what the requester sees, so keep
//! it short and addressed to a chat user.
//!
//! [`Reply`]: crate::reply::Reply

use crate::rate_limit::RateLimitDenial;
use crate::session::SessionState;
use bridge_traits::{BridgeError, JoinError};
use core_resolver::ResolutionError;
use thiserror::Error;

/// Errors returned by session commands.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    // ========================================================================
    // Denials (no state change)
    // ========================================================================
    /// The queue already holds `max` tracks.
    #[error("Queue is full ({max} tracks max)")]
    QueueFull { max: usize },

    /// A cooldown or per-user window rejected the command.
    #[error("{0}")]
    RateLimited(RateLimitDenial),

    /// Control commands are restricted to group admins.
    #[error("You need to be a group admin to do that")]
    PermissionDenied,

    /// The group has no session, or nothing is queued.
    #[error("Nothing is playing")]
    NoActiveSession,

    /// The command does not apply to the session's current state.
    #[error("Cannot {command} while {state}")]
    InvalidState {
        command: &'static str,
        state: SessionState,
    },

    // ========================================================================
    // Track Failures
    // ========================================================================
    /// The head track could not be resolved.
    #[error("Could not load track: {0}")]
    Resolution(#[from] ResolutionError),

    /// The voice backend could not start streaming, retries included.
    #[error("{}", join_message(.0))]
    BackendJoin(JoinError),

    /// A voice backend call other than join failed.
    #[error("Voice backend error: {0}")]
    Backend(#[from] BridgeError),

    /// The track left the queue before it started playing.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// The session's control loop is gone.
    #[error("Session closed")]
    SessionClosed,

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_message(err: &JoinError) -> String {
    match err {
        JoinError::NoActiveCall => "No active voice chat. Start a voice chat first!".to_string(),
        other => format!("Could not start streaming: {}", other),
    }
}

impl PlaybackError {
    /// Returns `true` if the command was rejected before reaching the
    /// session state machine.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            PlaybackError::QueueFull { .. }
                | PlaybackError::RateLimited(_)
                | PlaybackError::PermissionDenied
                | PlaybackError::NoActiveSession
                | PlaybackError::InvalidState { .. }
        )
    }

    /// Returns `true` if repeating the command later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::RateLimited(_) | PlaybackError::SessionClosed => true,
            PlaybackError::Resolution(err) => err.is_retryable(),
            PlaybackError::BackendJoin(err) => err.is_retryable(),
            PlaybackError::Backend(BridgeError::Timeout(_)) => true,
            _ => false,
        }
    }
}

impl From<JoinError> for PlaybackError {
    fn from(err: JoinError) -> Self {
        PlaybackError::BackendJoin(err)
    }
}

impl From<RateLimitDenial> for PlaybackError {
    fn from(denial: RateLimitDenial) -> Self {
        PlaybackError::RateLimited(denial)
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
