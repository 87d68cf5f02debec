//! # Group Playback Sessions
//!
//! Per-group playback: tracks, the bounded queue, the command rate limiter
//! and the session state machine that ties them to the resolver and the
//! voice backend.
//!
//! ## Overview
//!
//! This module handles:
//! - [`Queue`] of [`Track`]s with forward-only resolution status
//! - [`SessionRateLimiter`] cooldown and per-user window checks
//! - [`SessionHandle`], the address of one session's control loop
//! - [`Reply`] / [`PlaybackError`], the one answer every command gets
//!
//! ## Usage
//!
//! ```ignore
//! use core_playback::{Command, Requester, SessionContext, SessionHandle, SessionRateLimiter};
//! use tokio_util::task::TaskTracker;
//!
//! let tracker = TaskTracker::new();
//! let session = SessionHandle::spawn(group, ctx, SessionRateLimiter::from_config(&config), &tracker);
//!
//! let reply = session
//!     .command(Command::Play {
//!         source: "https://youtu.be/dQw4w9WgXcQ".into(),
//!         requester: Requester::user(42),
//!     })
//!     .await?;
//! println!("{}", reply);
//! ```

pub mod error;
pub mod queue;
pub mod rate_limit;
pub mod reply;
pub mod session;
pub mod track;

pub use error::{PlaybackError, Result};
pub use queue::Queue;
pub use rate_limit::{RateDecision, RateLimitDenial, RateLimitRule, SessionRateLimiter};
pub use reply::{format_duration, NowPlaying, QueueView, Reply};
pub use session::{
    Command, SessionContext, SessionHandle, SessionSettings, SessionState, SessionStatus,
};
pub use track::{Requester, ResolutionStatus, Track, TrackId, TrackSummary};
