use super::command::{Command, SessionMsg};
use super::runner::SessionRunner;
use super::state::{SessionState, SessionStatus};
use super::SessionContext;
use crate::error::{PlaybackError, Result};
use crate::rate_limit::SessionRateLimiter;
use crate::reply::Reply;
use bridge_traits::{BackendEvent, GroupId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::task::TaskTracker;

/// Cheap, cloneable address of a running session.
///
/// The session loop ends when it is stopped, evicted, shut down, or when
/// every handle has been dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    group: GroupId,
    tx: mpsc::Sender<SessionMsg>,
    status: watch::Receiver<SessionStatus>,
    limiter: Arc<SessionRateLimiter>,
}

impl SessionHandle {
    /// Start a session loop for `group` on `tracker`.
    pub fn spawn(
        group: GroupId,
        ctx: SessionContext,
        limiter: SessionRateLimiter,
        tracker: &TaskTracker,
    ) -> Self {
        let (tx, rx) = mpsc::channel(ctx.settings.channel_capacity.max(1));
        let (status_tx, status) = watch::channel(SessionStatus::default());

        let runner = SessionRunner::new(group, ctx, rx, tx.downgrade(), status_tx);
        tracker.spawn(runner.run());

        Self {
            group,
            tx,
            status,
            limiter: Arc::new(limiter),
        }
    }

    /// Send `command` and wait for its reply.
    ///
    /// A `play` into an empty session resolves once the track is playing or
    /// has failed; everything else answers as soon as the loop handles it.
    pub async fn command(&self, command: Command) -> Result<Reply> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMsg::Command { command, reply })
            .await
            .map_err(|_| PlaybackError::SessionClosed)?;
        rx.await.map_err(|_| PlaybackError::SessionClosed)?
    }

    /// Forward a voice backend callback.
    pub async fn backend_event(&self, event: BackendEvent) -> Result<()> {
        self.tx
            .send(SessionMsg::Backend(event))
            .await
            .map_err(|_| PlaybackError::SessionClosed)
    }

    /// Ask the loop to exit if it has been idle for at least
    /// `idle_timeout`. Returns the idle time when it did.
    pub async fn evict_if_idle(&self, idle_timeout: Duration) -> Result<Option<Duration>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMsg::EvictIfIdle {
                idle_timeout,
                reply,
            })
            .await
            .map_err(|_| PlaybackError::SessionClosed)?;
        rx.await.map_err(|_| PlaybackError::SessionClosed)
    }

    /// Stop playback, leave the voice chat and end the loop.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SessionMsg::Shutdown { reply }).await.is_ok() {
            rx.await.ok();
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn state(&self) -> SessionState {
        self.status().state
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// `true` if both handles address the same loop.
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    pub fn rate_limiter(&self) -> &SessionRateLimiter {
        &self.limiter
    }

    pub fn group_id(&self) -> GroupId {
        self.group
    }
}
