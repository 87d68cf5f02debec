//! # Event Bus System
//!
//! Asynchronous notifications from sessions to the chat collaborator, built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Every command gets exactly one reply, but a lot happens after the reply is
//! sent: a queued track starts playing minutes later, a prefetched track
//! turns out to be unplayable, the queue runs dry, an idle session is
//! evicted. Sessions publish those outcomes as [`CoreEvent`]s; the chat layer
//! subscribes and relays them to the right group.
//!
//! ```text
//! ┌───────────┐   emit    ┌───────────┐   subscribe   ┌────────────┐
//! │ Session A ├──────────>│           ├──────────────>│ Chat relay │
//! └───────────┘           │ EventBus  │               └────────────┘
//! ┌───────────┐   emit    │ (broadcast│   subscribe   ┌────────────┐
//! │ Session B ├──────────>│  channel) ├──────────────>│  Metrics   │
//! └───────────┘           └───────────┘               └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use bridge_traits::GroupId;
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::QueueEnded {
//!     group_id: GroupId::new(-1001),
//! }))
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.group_id(), GroupId::new(-1001));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n`
//!   events. Non-fatal; keep receiving.
//! - **`RecvError::Closed`**: every sender is gone. Treat as shutdown.
//!
//! Emitting with no subscribers returns an error that publishers ignore.

use bridge_traits::{GroupId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Track and playback lifecycle
    Playback(PlaybackEvent),
    /// Session lifecycle
    Session(SessionEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Session(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::TrackFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::NowPlaying { .. })
            | CoreEvent::Playback(PlaybackEvent::QueueEnded { .. })
            | CoreEvent::Session(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// The group the event belongs to.
    pub fn group_id(&self) -> GroupId {
        match self {
            CoreEvent::Playback(e) => e.group_id(),
            CoreEvent::Session(e) => e.group_id(),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Track lifecycle inside one group's session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A track was appended behind at least one other track.
    TrackQueued {
        group_id: GroupId,
        track_id: String,
        source: String,
        /// 1-based queue position, the playing track being 1.
        position: usize,
        requested_by: UserId,
    },
    /// The backend started streaming a track.
    NowPlaying {
        group_id: GroupId,
        track_id: String,
        title: String,
        duration_secs: u64,
        requested_by: UserId,
        /// Time from entering `Loading` to the backend confirming playback.
        startup_ms: u64,
    },
    /// A track played to its end.
    TrackFinished { group_id: GroupId, track_id: String },
    /// A track was skipped by a user.
    TrackSkipped { group_id: GroupId, track_id: String },
    /// A track could not be resolved or streamed and was dropped.
    TrackFailed {
        group_id: GroupId,
        track_id: String,
        source: String,
        requested_by: UserId,
        message: String,
    },
    /// Playback held.
    Paused { group_id: GroupId },
    /// Playback continued.
    Resumed { group_id: GroupId },
    /// Playback stopped and the queue cleared.
    Stopped {
        group_id: GroupId,
        /// Tracks removed from the queue, the current one included.
        cleared: usize,
    },
    /// The last track left the queue and the backend left the call.
    QueueEnded { group_id: GroupId },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::TrackQueued { .. } => "Track added to queue",
            PlaybackEvent::NowPlaying { .. } => "Now playing",
            PlaybackEvent::TrackFinished { .. } => "Track finished",
            PlaybackEvent::TrackSkipped { .. } => "Track skipped",
            PlaybackEvent::TrackFailed { .. } => "Track failed",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::Resumed { .. } => "Playback resumed",
            PlaybackEvent::Stopped { .. } => "Playback stopped",
            PlaybackEvent::QueueEnded { .. } => "Queue ended",
        }
    }

    pub fn group_id(&self) -> GroupId {
        match self {
            PlaybackEvent::TrackQueued { group_id, .. }
            | PlaybackEvent::NowPlaying { group_id, .. }
            | PlaybackEvent::TrackFinished { group_id, .. }
            | PlaybackEvent::TrackSkipped { group_id, .. }
            | PlaybackEvent::TrackFailed { group_id, .. }
            | PlaybackEvent::Paused { group_id }
            | PlaybackEvent::Resumed { group_id }
            | PlaybackEvent::Stopped { group_id, .. }
            | PlaybackEvent::QueueEnded { group_id } => *group_id,
        }
    }
}

// ============================================================================
// Session Events
// ============================================================================

/// Session registry lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// A session was created for a group.
    Created { group_id: GroupId },
    /// An idle session was torn down.
    Evicted { group_id: GroupId, idle_secs: u64 },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::Created { .. } => "Session created",
            SessionEvent::Evicted { .. } => "Idle session evicted",
        }
    }

    pub fn group_id(&self) -> GroupId {
        match self {
            SessionEvent::Created { group_id } | SessionEvent::Evicted { group_id, .. } => {
                *group_id
            }
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning is cheap; clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use bridge_traits::GroupId;
/// use core_runtime::events::{EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let stream = EventStream::new(bus.subscribe()).for_group(GroupId::new(7));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only yield events matching `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only yield events for `group`.
    pub fn for_group(self, group: GroupId) -> Self {
        self.filter(move |event| event.group_id() == group)
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once all senders are dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `None` when nothing
    /// matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        use tokio::sync::broadcast::error::TryRecvError;

        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => return Some(Err(RecvError::Lagged(n))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_ended(group: i64) -> CoreEvent {
        CoreEvent::Playback(PlaybackEvent::QueueEnded {
            group_id: GroupId::new(group),
        })
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(queue_ended(1)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.emit(queue_ended(1)).unwrap(), 2);
        assert_eq!(a.recv().await.unwrap(), queue_ended(1));
        assert_eq!(b.recv().await.unwrap(), queue_ended(1));
    }

    #[tokio::test]
    async fn test_event_stream_for_group() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).for_group(GroupId::new(2));

        bus.emit(queue_ended(1)).unwrap();
        bus.emit(queue_ended(2)).unwrap();

        assert_eq!(stream.recv().await.unwrap(), queue_ended(2));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for group in 0..5 {
            bus.emit(queue_ended(group)).unwrap();
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Playback(PlaybackEvent::TrackFailed {
            group_id: GroupId::new(1),
            track_id: "t".into(),
            source: "bad link".into(),
            requested_by: UserId::new(3),
            message: "No media found".into(),
        });
        assert_eq!(failed.severity(), EventSeverity::Warning);
        assert_eq!(queue_ended(1).severity(), EventSeverity::Info);
        let paused = CoreEvent::Playback(PlaybackEvent::Paused {
            group_id: GroupId::new(1),
        });
        assert_eq!(paused.severity(), EventSeverity::Debug);
        assert_eq!(paused.description(), "Playback paused");
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Session(SessionEvent::Evicted {
            group_id: GroupId::new(-5),
            idle_secs: 301,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"Session","payload":{"event":"Evicted","group_id":-5,"idle_secs":301}}"#
        );
        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
