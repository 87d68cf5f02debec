//! # Replies
//!
//! Successful command outcomes. The chat collaborator delivers exactly one
//! reply per command, either a [`Reply`] or a
//! [`PlaybackError`](crate::error::PlaybackError); both render to
//! user-facing text through `Display`.

use crate::session::SessionState;
use crate::track::{TrackId, TrackSummary};
use bridge_traits::UserId;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Upcoming entries rendered by [`QueueView`]'s `Display`.
pub const QUEUE_DISPLAY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    pub track_id: TrackId,
    pub title: String,
    pub duration: Duration,
    pub uploader: Option<String>,
    pub source: String,
    pub requested_by: UserId,
    /// Time from entering `Loading` to the backend confirming playback.
    pub startup: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    /// The requested track started playing.
    NowPlaying(NowPlaying),
    /// The requested track was appended behind the current one.
    Queued {
        position: usize,
        source: String,
        track_id: TrackId,
    },
    Paused,
    Resumed,
    Skipped {
        title: String,
    },
    /// Playback stopped and the queue was cleared.
    Stopped {
        cleared: usize,
    },
    Queue(QueueView),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::NowPlaying(np) => {
                write!(f, "Now playing: {}", np.title)?;
                write!(f, "\nDuration: {}", format_duration(np.duration))?;
                if let Some(uploader) = &np.uploader {
                    write!(f, "\nUploader: {}", uploader)?;
                }
                write!(f, "\nStartup: {:.2}s", np.startup.as_secs_f64())
            }
            Reply::Queued { position, source, .. } => {
                write!(f, "Added to queue at position {}: {}", position, source)
            }
            Reply::Paused => f.write_str("Paused"),
            Reply::Resumed => f.write_str("Resumed"),
            Reply::Skipped { title } => write!(f, "Skipped: {}", title),
            Reply::Stopped { cleared } => {
                write!(f, "Stopped playback and cleared {} track(s)", cleared)
            }
            Reply::Queue(view) => view.fmt(f),
        }
    }
}

/// Snapshot of a session's queue for the `queue` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueView {
    pub state: SessionState,
    pub now_playing: Option<TrackSummary>,
    pub upcoming: Vec<TrackSummary>,
}

impl QueueView {
    /// View of a group with no session.
    pub fn empty() -> Self {
        Self {
            state: SessionState::Idle,
            now_playing: None,
            upcoming: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.now_playing.is_none() && self.upcoming.is_empty()
    }

    /// Tracks in the queue, head included.
    pub fn len(&self) -> usize {
        usize::from(self.now_playing.is_some()) + self.upcoming.len()
    }
}

impl fmt::Display for QueueView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("Queue is empty");
        }

        if let Some(current) = &self.now_playing {
            let label = match self.state {
                SessionState::Paused => "Paused",
                SessionState::Loading => "Loading",
                _ => "Now playing",
            };
            write!(f, "{}: {}", label, current.title)?;
            if let Some(duration) = current.duration {
                write!(f, " [{}]", format_duration(duration))?;
            }
        }

        if !self.upcoming.is_empty() {
            f.write_str("\n\nUp next:")?;
            for (i, track) in self.upcoming.iter().take(QUEUE_DISPLAY_LIMIT).enumerate() {
                write!(f, "\n{}. {}", i + 1, track.title)?;
                if let Some(duration) = track.duration {
                    write!(f, " [{}]", format_duration(duration))?;
                }
            }
            if self.upcoming.len() > QUEUE_DISPLAY_LIMIT {
                write!(
                    f,
                    "\n... and {} more",
                    self.upcoming.len() - QUEUE_DISPLAY_LIMIT
                )?;
            }
        }
        Ok(())
    }
}

/// `42s`, `3:05` or `1:02:03`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total < 60 {
        format!("{}s", total)
    } else if total < 3600 {
        format!("{}:{:02}", total / 60, total % 60)
    } else {
        format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
    }
}
