use serde::{Deserialize, Serialize};
use std::fmt;

/// Playback state of one session.
///
/// ```text
///   Idle ──play──> Loading ──joined──> Playing <──resume── Paused
///    ^               │  ^                 │ └────pause──────> ^
///    │   failed,     │  │ track ended,    │
///    │   queue empty │  │ skip or failure │
///    ├───────────────┘  └─────────────────┘
///    │
///    └── Stopped <── stop / leave (any active state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No queue head, not in the voice chat.
    #[default]
    Idle,
    /// Head track resolving or the backend join in progress.
    Loading,
    /// Backend streaming the head track.
    Playing,
    /// Backend holding the stream, head unchanged.
    Paused,
    /// Cleanup after a stop. Collapses to `Idle` within the same event.
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Loading => "loading",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        }
    }

    /// `true` for `Loading`, `Playing` and `Paused`: the queue head is the
    /// current track.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Loading | SessionState::Playing | SessionState::Paused
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published by the session loop after every event it handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub queue_len: usize,
    /// Events handled so far.
    pub seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::Loading.to_string(), "loading");
        assert_eq!(
            serde_json::to_string(&SessionState::Paused).unwrap(),
            "\"paused\""
        );
        assert!(SessionState::Paused.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Stopped.is_active());
    }
}
