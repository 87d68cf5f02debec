use crate::error::Result;
use crate::reply::Reply;
use crate::track::{Requester, TrackId};
use bridge_traits::{BackendEvent, JoinError, ResolvedMetadata};
use core_resolver::ResolutionError;
use std::time::Duration;
use tokio::sync::oneshot;

/// A user command addressed to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play { source: String, requester: Requester },
    Pause,
    Resume,
    /// Pause when playing, resume when paused.
    TogglePause,
    Skip,
    Stop,
    /// Same as `Stop`.
    Leave,
    Queue,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play { .. } => "play",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::TogglePause => "toggle_pause",
            Command::Skip => "skip",
            Command::Stop => "stop",
            Command::Leave => "leave",
            Command::Queue => "queue",
        }
    }

    /// Commands gated by `admin_only_controls`.
    pub fn is_control(&self) -> bool {
        !matches!(self, Command::Play { .. } | Command::Queue)
    }

    /// Commands that go through the rate limiter.
    pub fn is_rate_limited(&self) -> bool {
        !matches!(self, Command::Queue)
    }

    /// Commands that tear the session down when they succeed.
    pub fn ends_session(&self) -> bool {
        matches!(self, Command::Stop | Command::Leave)
    }
}

/// Everything the session loop consumes, in arrival order.
pub(crate) enum SessionMsg {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<Reply>>,
    },
    Backend(BackendEvent),
    Resolved {
        track_id: TrackId,
        result: std::result::Result<ResolvedMetadata, ResolutionError>,
    },
    JoinFinished {
        track_id: TrackId,
        generation: u64,
        attempt: u32,
        result: std::result::Result<(), JoinError>,
    },
    /// Answered with the idle time when the loop exits.
    EvictIfIdle {
        idle_timeout: Duration,
        reply: oneshot::Sender<Option<Duration>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl SessionMsg {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            SessionMsg::Command { command, .. } => command.name(),
            SessionMsg::Backend(BackendEvent::TrackEnded { .. }) => "track_ended",
            SessionMsg::Backend(BackendEvent::Error { .. }) => "backend_error",
            SessionMsg::Resolved { result: Ok(_), .. } => "resolution_ready",
            SessionMsg::Resolved { result: Err(_), .. } => "resolution_failed",
            SessionMsg::JoinFinished { .. } => "join_finished",
            SessionMsg::EvictIfIdle { .. } => "evict_if_idle",
            SessionMsg::Shutdown { .. } => "shutdown",
        }
    }
}
