use super::command::{Command, SessionMsg};
use super::state::{SessionState, SessionStatus};
use super::SessionContext;
use crate::error::{PlaybackError, Result};
use crate::queue::Queue;
use crate::reply::{NowPlaying, QueueView, Reply};
use crate::track::{Requester, ResolutionStatus, Track, TrackId};
use bridge_traits::{BackendEvent, BridgeError, GroupId, JoinError, ResolvedMetadata};
use core_resolver::ResolutionError;
use core_runtime::events::{CoreEvent, PlaybackEvent};
use core_runtime::metrics::MetricKind;
use std::collections::HashMap;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, instrument, warn, Instrument};

type ReplyTx = oneshot::Sender<Result<Reply>>;

struct InFlightJoin {
    track_id: TrackId,
    generation: u64,
    abort: AbortHandle,
}

/// What the head needs next.
enum HeadStep {
    Drop(ResolutionError),
    Resolve,
    Wait,
    Join,
}

pub(crate) struct SessionRunner {
    group: GroupId,
    ctx: SessionContext,
    queue: Queue,
    state: SessionState,
    seq: u64,
    /// Bumped whenever the head leaves the queue.
    generation: u64,
    last_activity: Instant,
    loading_since: Option<Instant>,
    /// `play` replies waiting for their track to start.
    pending: HashMap<TrackId, ReplyTx>,
    resolving: HashMap<TrackId, AbortHandle>,
    join: Option<InFlightJoin>,
    /// The backend may be in the voice chat.
    joined: bool,
    rx: mpsc::Receiver<SessionMsg>,
    loopback: mpsc::WeakSender<SessionMsg>,
    status: watch::Sender<SessionStatus>,
}

impl SessionRunner {
    pub(crate) fn new(
        group: GroupId,
        ctx: SessionContext,
        rx: mpsc::Receiver<SessionMsg>,
        loopback: mpsc::WeakSender<SessionMsg>,
        status: watch::Sender<SessionStatus>,
    ) -> Self {
        let queue = Queue::new(ctx.settings.max_queue_length);
        Self {
            group,
            ctx,
            queue,
            state: SessionState::Idle,
            seq: 0,
            generation: 0,
            last_activity: Instant::now(),
            loading_since: None,
            pending: HashMap::new(),
            resolving: HashMap::new(),
            join: None,
            joined: false,
            rx,
            loopback,
            status,
        }
    }

    #[instrument(name = "session", skip_all, fields(group_id = %self.group))]
    pub(crate) async fn run(mut self) {
        info!("Session started");

        while let Some(msg) = self.rx.recv().await {
            self.seq += 1;
            debug!(seq = self.seq, event = msg.kind(), state = %self.state, "Handling event");

            let flow = self.handle(msg).await;
            self.publish_status();
            if flow.is_break() {
                break;
            }
        }

        self.rx.close();
        self.abort_in_flight();
        info!(events = self.seq, "Session ended");
    }

    async fn handle(&mut self, msg: SessionMsg) -> ControlFlow<()> {
        match msg {
            SessionMsg::Command { command, reply } => {
                return self.on_command(command, reply).await
            }
            SessionMsg::Backend(event) => self.on_backend_event(event).await,
            SessionMsg::Resolved { track_id, result } => self.on_resolved(track_id, result).await,
            SessionMsg::JoinFinished {
                track_id,
                generation,
                attempt,
                result,
            } => {
                self.on_join_finished(track_id, generation, attempt, result)
                    .await
            }
            SessionMsg::EvictIfIdle {
                idle_timeout,
                reply,
            } => {
                let idle = self.last_activity.elapsed();
                if self.state == SessionState::Idle && self.queue.is_empty() && idle >= idle_timeout
                {
                    info!(idle_secs = idle.as_secs(), "Evicting idle session");
                    reply.send(Some(idle)).ok();
                    return ControlFlow::Break(());
                }
                reply.send(None).ok();
            }
            SessionMsg::Shutdown { reply } => {
                if self.state != SessionState::Idle {
                    self.stop().await.ok();
                }
                reply.send(()).ok();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn on_command(&mut self, command: Command, reply: ReplyTx) -> ControlFlow<()> {
        let ends_session = command.ends_session();
        let result = match command {
            Command::Play { source, requester } => {
                // may keep the reply until the track starts
                self.play(source, requester, reply).await;
                return ControlFlow::Continue(());
            }
            Command::Queue => Ok(Reply::Queue(self.view())),
            Command::Pause => self.pause().await,
            Command::Resume => self.resume().await,
            Command::TogglePause => match self.state {
                SessionState::Paused => self.resume().await,
                _ => self.pause().await,
            },
            Command::Skip => self.skip().await,
            Command::Stop | Command::Leave => self.stop().await,
        };

        let flow = if ends_session && result.is_ok() {
            info!("Session torn down by stop");
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        };
        reply.send(result).ok();
        flow
    }

    async fn play(&mut self, source: String, requester: Requester, reply: ReplyTx) {
        let track = Track::new(source, requester);
        let (track_id, source) = (track.id, track.source.clone());
        let was_empty = self.queue.is_empty();

        let position = match self.queue.enqueue(track) {
            Ok(position) => position,
            Err(err) => {
                warn!(source = %source, "Queue full, rejecting track");
                reply.send(Err(err)).ok();
                return;
            }
        };
        self.touch();

        if was_empty {
            info!(source = %source, track_id = %track_id, "Starting playback");
            self.pending.insert(track_id, reply);
            self.advance().await;
            return;
        }

        info!(source = %source, position, "Track queued");
        self.emit(PlaybackEvent::TrackQueued {
            group_id: self.group,
            track_id: track_id.to_string(),
            source: source.clone(),
            position,
            requested_by: requester.user_id,
        });
        reply
            .send(Ok(Reply::Queued {
                position,
                source,
                track_id,
            }))
            .ok();
        self.maybe_prefetch();
    }

    async fn pause(&mut self) -> Result<Reply> {
        self.require_state("pause", SessionState::Playing)?;
        let backend = Arc::clone(&self.ctx.backend);
        self.call_backend(backend.pause(self.group)).await?;

        self.set_state(SessionState::Paused);
        self.emit(PlaybackEvent::Paused {
            group_id: self.group,
        });
        info!("Paused");
        Ok(Reply::Paused)
    }

    async fn resume(&mut self) -> Result<Reply> {
        self.require_state("resume", SessionState::Paused)?;
        let backend = Arc::clone(&self.ctx.backend);
        self.call_backend(backend.resume(self.group)).await?;

        self.set_state(SessionState::Playing);
        self.emit(PlaybackEvent::Resumed {
            group_id: self.group,
        });
        info!("Resumed");
        Ok(Reply::Resumed)
    }

    async fn skip(&mut self) -> Result<Reply> {
        if !self.state.is_active() {
            return Err(PlaybackError::NoActiveSession);
        }
        let track = self.drop_head().ok_or(PlaybackError::NoActiveSession)?;

        if let Some(reply) = self.pending.remove(&track.id) {
            reply
                .send(Err(PlaybackError::Cancelled("skipped".to_string())))
                .ok();
        }
        info!(track_id = %track.id, title = %track.title(), "Skipped");
        self.emit(PlaybackEvent::TrackSkipped {
            group_id: self.group,
            track_id: track.id.to_string(),
        });

        self.advance().await;
        Ok(Reply::Skipped {
            title: track.title().to_string(),
        })
    }

    async fn stop(&mut self) -> Result<Reply> {
        if !self.state.is_active() {
            return Err(PlaybackError::NoActiveSession);
        }
        self.set_state(SessionState::Stopped);
        self.generation += 1;
        self.abort_in_flight();

        let cleared = self.queue.clear();
        for track in &cleared {
            if let Some(reply) = self.pending.remove(&track.id) {
                reply
                    .send(Err(PlaybackError::Cancelled("playback stopped".to_string())))
                    .ok();
            }
        }
        if self.joined {
            self.leave_call().await;
        }

        self.loading_since = None;
        self.set_state(SessionState::Idle);
        info!(cleared = cleared.len(), "Stopped");
        self.emit(PlaybackEvent::Stopped {
            group_id: self.group,
            cleared: cleared.len(),
        });
        Ok(Reply::Stopped {
            cleared: cleared.len(),
        })
    }

    fn require_state(&self, command: &'static str, expected: SessionState) -> Result<()> {
        match self.state {
            state if state == expected => Ok(()),
            SessionState::Idle | SessionState::Stopped => Err(PlaybackError::NoActiveSession),
            state => Err(PlaybackError::InvalidState { command, state }),
        }
    }

    fn view(&self) -> QueueView {
        let mut tracks = self.queue.iter().map(Track::summary);
        QueueView {
            state: self.state,
            now_playing: tracks.next(),
            upcoming: tracks.collect(),
        }
    }

    // ========================================================================
    // Backend callbacks
    // ========================================================================

    async fn on_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::TrackEnded { .. } => {
                if self.state != SessionState::Playing {
                    debug!(state = %self.state, "Ignoring track end outside of playback");
                    return;
                }
                if let Some(track) = self.drop_head() {
                    info!(track_id = %track.id, title = %track.title(), "Track finished");
                    self.emit(PlaybackEvent::TrackFinished {
                        group_id: self.group,
                        track_id: track.id.to_string(),
                    });
                }
                self.advance().await;
            }
            BackendEvent::Error { message, .. } => {
                if !matches!(self.state, SessionState::Playing | SessionState::Paused) {
                    debug!(state = %self.state, error = %message, "Ignoring backend error outside of playback");
                    return;
                }
                self.fail_head(PlaybackError::Backend(BridgeError::OperationFailed(message)));
                self.advance().await;
            }
        }
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    fn spawn_resolution(&mut self, track_id: TrackId) {
        let Some(track) = self.queue.get_mut(track_id) else {
            return;
        };
        if !track.begin_resolving() {
            return;
        }
        let source = track.source.clone();
        let resolver = Arc::clone(&self.ctx.resolver);
        let loopback = self.loopback.clone();

        let task = tokio::spawn(
            async move {
                let result = resolver.resolve(&source).await;
                if let Some(tx) = loopback.upgrade() {
                    tx.send(SessionMsg::Resolved { track_id, result }).await.ok();
                }
            }
            .in_current_span(),
        );
        self.resolving.insert(track_id, task.abort_handle());
    }

    /// Start resolving the second entry once the head no longer needs the
    /// resolver.
    fn maybe_prefetch(&mut self) {
        let head_ready = self.queue.peek_head().map_or(false, Track::is_resolved);
        let next = self
            .queue
            .peek_next()
            .filter(|t| matches!(t.status(), ResolutionStatus::Unresolved))
            .map(|t| t.id);

        if let (true, Some(track_id)) = (head_ready, next) {
            debug!(track_id = %track_id, "Prefetching next track");
            self.spawn_resolution(track_id);
        }
    }

    async fn on_resolved(
        &mut self,
        track_id: TrackId,
        result: std::result::Result<ResolvedMetadata, ResolutionError>,
    ) {
        self.resolving.remove(&track_id);
        let Some(track) = self.queue.get_mut(track_id) else {
            debug!(track_id = %track_id, "Discarding resolution for a track no longer queued");
            return;
        };

        match result {
            Ok(metadata) => {
                track.mark_resolved(metadata);
                let head_waiting = self.queue.is_head(track_id)
                    && self.state == SessionState::Loading
                    && self.join.is_none();
                if head_waiting {
                    self.start_join(track_id, 1, Duration::ZERO);
                }
                self.maybe_prefetch();
            }
            Err(err) => {
                track.mark_failed(err.clone());
                if self.queue.is_head(track_id) && self.state == SessionState::Loading {
                    self.fail_head(PlaybackError::Resolution(err));
                    self.advance().await;
                } else {
                    debug!(track_id = %track_id, error = %err, "Prefetch failed");
                }
            }
        }
    }

    // ========================================================================
    // Backend join
    // ========================================================================

    fn start_join(&mut self, track_id: TrackId, attempt: u32, delay: Duration) {
        let Some(stream) = self
            .queue
            .peek_head()
            .filter(|t| t.id == track_id)
            .and_then(Track::metadata)
            .map(|m| m.stream.clone())
        else {
            return;
        };
        let backend = Arc::clone(&self.ctx.backend);
        let loopback = self.loopback.clone();
        let (group, generation) = (self.group, self.generation);
        let limit = self.ctx.settings.backend_timeout;

        let task = tokio::spawn(
            async move {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                let result = timeout(limit, backend.join_and_stream(group, &stream))
                    .await
                    .unwrap_or(Err(JoinError::Timeout));
                if let Some(tx) = loopback.upgrade() {
                    tx.send(SessionMsg::JoinFinished {
                        track_id,
                        generation,
                        attempt,
                        result,
                    })
                    .await
                    .ok();
                }
            }
            .in_current_span(),
        );

        self.joined = true;
        self.join = Some(InFlightJoin {
            track_id,
            generation,
            abort: task.abort_handle(),
        });
    }

    async fn on_join_finished(
        &mut self,
        track_id: TrackId,
        generation: u64,
        attempt: u32,
        result: std::result::Result<(), JoinError>,
    ) {
        let current = matches!(
            &self.join,
            Some(join) if join.track_id == track_id && join.generation == generation
        );
        if !current || self.state != SessionState::Loading {
            debug!(track_id = %track_id, "Discarding stale join result");
            return;
        }
        self.join = None;

        let err = match result {
            Ok(()) => {
                self.on_playing();
                return;
            }
            Err(err) => err,
        };

        match self.ctx.settings.join_retry.next_delay(attempt) {
            Some(delay) if err.is_retryable() => {
                warn!(
                    error = %err,
                    "Join attempt {} failed, retrying in {:?}",
                    attempt, delay
                );
                self.start_join(track_id, attempt + 1, delay);
            }
            _ => {
                error!(error = %err, attempts = attempt, "Could not start streaming");
                self.fail_head(PlaybackError::BackendJoin(err));
                self.advance().await;
            }
        }
    }

    fn on_playing(&mut self) {
        let startup = self
            .loading_since
            .take()
            .map(|since| since.elapsed())
            .unwrap_or_default();
        self.set_state(SessionState::Playing);
        self.ctx.metrics.record(MetricKind::PlaybackStart, startup);

        let Some(now_playing) = self.queue.peek_head().and_then(|t| now_playing(t, startup))
        else {
            return;
        };
        info!(
            title = %now_playing.title,
            startup_ms = startup.as_millis() as u64,
            "Now playing"
        );
        self.emit(PlaybackEvent::NowPlaying {
            group_id: self.group,
            track_id: now_playing.track_id.to_string(),
            title: now_playing.title.clone(),
            duration_secs: now_playing.duration.as_secs(),
            requested_by: now_playing.requested_by,
            startup_ms: startup.as_millis() as u64,
        });
        if let Some(reply) = self.pending.remove(&now_playing.track_id) {
            reply.send(Ok(Reply::NowPlaying(now_playing))).ok();
        }
        self.maybe_prefetch();
    }

    // ========================================================================
    // Queue progression
    // ========================================================================

    /// Make the queue head current, dropping failed heads on the way, or go
    /// idle when the queue runs dry.
    async fn advance(&mut self) {
        loop {
            let Some(head) = self.queue.peek_head() else {
                self.finish_queue().await;
                return;
            };
            let head_id = head.id;
            let step = match head.status() {
                ResolutionStatus::Failed(err) => HeadStep::Drop(err.clone()),
                ResolutionStatus::Unresolved => HeadStep::Resolve,
                ResolutionStatus::Resolving => HeadStep::Wait,
                ResolutionStatus::Resolved { .. } => HeadStep::Join,
            };

            if let HeadStep::Drop(err) = step {
                self.fail_head(PlaybackError::Resolution(err));
                continue;
            }

            self.loading_since = Some(Instant::now());
            self.set_state(SessionState::Loading);
            match step {
                HeadStep::Resolve => self.spawn_resolution(head_id),
                HeadStep::Join => {
                    self.start_join(head_id, 1, Duration::ZERO);
                    self.maybe_prefetch();
                }
                HeadStep::Wait | HeadStep::Drop(_) => {}
            }
            return;
        }
    }

    async fn finish_queue(&mut self) {
        self.loading_since = None;
        if self.joined {
            self.leave_call().await;
        }
        if self.state != SessionState::Idle {
            self.set_state(SessionState::Idle);
            info!("Queue ended");
            self.emit(PlaybackEvent::QueueEnded {
                group_id: self.group,
            });
        }
    }

    /// Drop the head, cancelling its in-flight work.
    fn drop_head(&mut self) -> Option<Track> {
        let track = self.queue.drop_head()?;
        self.generation += 1;
        if let Some(task) = self.resolving.remove(&track.id) {
            task.abort();
        }
        if let Some(join) = self.join.take() {
            join.abort.abort();
        }
        self.touch();
        Some(track)
    }

    /// Drop the head and report `err` to its requester and the event bus.
    fn fail_head(&mut self, err: PlaybackError) {
        let Some(track) = self.drop_head() else {
            return;
        };
        warn!(track_id = %track.id, source = %track.source, error = %err, "Track failed");
        self.emit(PlaybackEvent::TrackFailed {
            group_id: self.group,
            track_id: track.id.to_string(),
            source: track.source.clone(),
            requested_by: track.requested_by.user_id,
            message: err.to_string(),
        });
        if let Some(reply) = self.pending.remove(&track.id) {
            reply.send(Err(err)).ok();
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn leave_call(&mut self) {
        self.joined = false;
        match timeout(
            self.ctx.settings.backend_timeout,
            self.ctx.backend.leave(self.group),
        )
        .await
        {
            Ok(Ok(())) => debug!("Left voice chat"),
            Ok(Err(err)) => warn!(error = %err, "Failed to leave voice chat"),
            Err(_) => warn!("Timed out leaving voice chat"),
        }
    }

    async fn call_backend<F>(&self, call: F) -> Result<()>
    where
        F: Future<Output = bridge_traits::error::Result<()>>,
    {
        timeout(self.ctx.settings.backend_timeout, call)
            .await
            .map_err(|_| BridgeError::Timeout("voice backend did not answer".to_string()))??;
        Ok(())
    }

    fn abort_in_flight(&mut self) {
        for (_, task) in self.resolving.drain() {
            task.abort();
        }
        if let Some(join) = self.join.take() {
            join.abort.abort();
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "State transition");
            self.state = state;
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn emit(&self, event: PlaybackEvent) {
        // no subscribers is fine
        self.ctx.events.emit(CoreEvent::Playback(event)).ok();
    }

    fn publish_status(&self) {
        self.status.send_replace(SessionStatus {
            state: self.state,
            queue_len: self.queue.len(),
            seq: self.seq,
        });
    }
}

fn now_playing(track: &Track, startup: Duration) -> Option<NowPlaying> {
    let metadata = track.metadata()?;
    Some(NowPlaying {
        track_id: track.id,
        title: metadata.title.clone(),
        duration: metadata.duration,
        uploader: metadata.uploader.clone(),
        source: track.source.clone(),
        requested_by: track.requested_by.user_id,
        startup,
    })
}
