//! # Dispatcher
//!
//! Routes commands from the chat collaborator to per-group sessions and owns
//! everything sessions share.
//!
//! ## Command path
//!
//! ```text
//! handle_command(group, command, requester)
//!   ├─ admin gate (control commands, admin_only_controls) ──> PermissionDenied
//!   ├─ registry lookup
//!   │    ├─ play:  get or create the session
//!   │    ├─ queue: missing session ──> empty view
//!   │    └─ other: missing session ──> NoActiveSession
//!   ├─ session rate limiter ─────────────────────────────> RateLimited
//!   └─ session loop ─> Reply / PlaybackError
//!        └─ SessionClosed (evicted meanwhile): play retries once on a
//!           fresh session
//! ```
//!
//! The registry is a `DashMap`, so lookups for different groups never
//! contend with each other or with any session loop. A background task
//! evicts idle sessions, purges the resolution cache and trims the rate
//! limiters every `maintenance_interval`.

use crate::error::{CoreError, Result};
use crate::health::{HealthReport, HealthStatus, MaintenanceReport, PoolStats};
use bridge_traits::{BackendEvent, Extractor, GroupId, VoiceBackend};
use chrono::Utc;
use core_playback::{
    Command, PlaybackError, QueueView, Reply, Requester, SessionContext, SessionHandle,
    SessionRateLimiter, SessionSettings, SessionState,
};
use core_resolver::Resolver;
use core_runtime::config::OrchestratorConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream, SessionEvent};
use core_runtime::metrics::{MetricKind, MetricsSnapshot, PerformanceMonitor};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

type CommandResult = core_playback::Result<Reply>;

struct Inner {
    config: OrchestratorConfig,
    sessions: DashMap<GroupId, SessionHandle>,
    ctx: SessionContext,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    maintenance_alive: Arc<AtomicBool>,
}

/// Registry of group sessions plus the shared resolver, pool, cache and
/// metrics. Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Build a dispatcher and start its maintenance task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `Runtime` if `config` fails validation, `InitializationFailed` when
    /// no runtime is running.
    pub fn new(
        config: OrchestratorConfig,
        extractor: Arc<dyn Extractor>,
        backend: Arc<dyn VoiceBackend>,
    ) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::InitializationFailed(format!("no tokio runtime: {}", e)))?;

        let metrics = Arc::new(PerformanceMonitor::new());
        let ctx = SessionContext {
            resolver: Arc::new(Resolver::new(extractor, &config, Arc::clone(&metrics))),
            backend,
            events: EventBus::new(config.event_buffer_size),
            metrics,
            settings: SessionSettings::from(&config),
        };

        let inner = Arc::new(Inner {
            config,
            sessions: DashMap::new(),
            ctx,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            maintenance_alive: Arc::new(AtomicBool::new(false)),
        });
        spawn_maintenance(&inner);

        info!(
            pool_size = inner.ctx.resolver.pool().size(),
            max_queue_length = inner.config.max_queue_length,
            "Dispatcher started"
        );
        Ok(Self { inner })
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub async fn play(
        &self,
        group: GroupId,
        source: impl Into<String>,
        requester: Requester,
    ) -> CommandResult {
        let command = Command::Play {
            source: source.into(),
            requester,
        };
        self.handle_command(group, command, requester).await
    }

    pub async fn pause(&self, group: GroupId, requester: Requester) -> CommandResult {
        self.handle_command(group, Command::Pause, requester).await
    }

    pub async fn resume(&self, group: GroupId, requester: Requester) -> CommandResult {
        self.handle_command(group, Command::Resume, requester).await
    }

    pub async fn toggle_pause(&self, group: GroupId, requester: Requester) -> CommandResult {
        self.handle_command(group, Command::TogglePause, requester)
            .await
    }

    pub async fn skip(&self, group: GroupId, requester: Requester) -> CommandResult {
        self.handle_command(group, Command::Skip, requester).await
    }

    pub async fn stop(&self, group: GroupId, requester: Requester) -> CommandResult {
        self.handle_command(group, Command::Stop, requester).await
    }

    pub async fn leave(&self, group: GroupId, requester: Requester) -> CommandResult {
        self.handle_command(group, Command::Leave, requester).await
    }

    /// Current queue of `group`. Never rate limited and never creates a
    /// session.
    pub async fn queue(&self, group: GroupId) -> QueueView {
        let Some(session) = self.session(group) else {
            return QueueView::empty();
        };
        match session.command(Command::Queue).await {
            Ok(Reply::Queue(view)) => view,
            _ => QueueView::empty(),
        }
    }

    /// Run one command and record its response time.
    #[instrument(
        skip(self, command, requester),
        fields(group_id = %group, command = command.name(), user_id = %requester.user_id)
    )]
    pub async fn handle_command(
        &self,
        group: GroupId,
        command: Command,
        requester: Requester,
    ) -> CommandResult {
        let started = Instant::now();
        let result = self.dispatch(group, command, requester).await;
        self.inner
            .ctx
            .metrics
            .record(MetricKind::CommandResponse, started.elapsed());

        match &result {
            Ok(_) => debug!("Command handled"),
            Err(err) if err.is_denial() => debug!(reason = %err, "Command denied"),
            Err(err) => warn!(error = %err, "Command failed"),
        }
        result
    }

    async fn dispatch(
        &self,
        group: GroupId,
        command: Command,
        requester: Requester,
    ) -> CommandResult {
        if self.inner.shutdown.is_cancelled() {
            return Err(PlaybackError::SessionClosed);
        }
        if command.is_control() && self.inner.config.admin_only_controls && !requester.is_admin {
            return Err(PlaybackError::PermissionDenied);
        }

        let creates = matches!(command, Command::Play { .. });
        let mut session = match self.session(group) {
            Some(session) => session,
            None if creates => self.session_for_play(group),
            None if matches!(command, Command::Queue) => {
                return Ok(Reply::Queue(QueueView::empty()))
            }
            None => return Err(PlaybackError::NoActiveSession),
        };

        let mut retried = false;
        loop {
            if command.is_rate_limited() {
                session
                    .rate_limiter()
                    .check(requester.user_id)
                    .into_result()?;
            }

            match session.command(command.clone()).await {
                Err(PlaybackError::SessionClosed) if !retried => {
                    retried = true;
                    self.inner
                        .sessions
                        .remove_if(&group, |_, existing| existing.same_session(&session));
                    if !creates {
                        return Err(PlaybackError::NoActiveSession);
                    }
                    debug!("Session closed under the command, retrying on a new one");
                    session = self.session_for_play(group);
                }
                result => {
                    if result.is_ok() && command.ends_session() {
                        // the loop has exited; the next play starts a fresh session
                        self.inner
                            .sessions
                            .remove_if(&group, |_, existing| existing.same_session(&session));
                        debug!("Session removed after stop");
                    }
                    return result;
                }
            }
        }
    }

    /// Existing open session for `group`, or a new one.
    fn session_for_play(&self, group: GroupId) -> SessionHandle {
        match self.inner.sessions.entry(group) {
            Entry::Occupied(mut entry) if entry.get().is_closed() => {
                let session = self.spawn_session(group);
                entry.insert(session.clone());
                session
            }
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let session = self.spawn_session(group);
                entry.insert(session.clone());
                session
            }
        }
    }

    fn spawn_session(&self, group: GroupId) -> SessionHandle {
        info!(group_id = %group, "Creating session");
        let session = SessionHandle::spawn(
            group,
            self.inner.ctx.clone(),
            SessionRateLimiter::from_config(&self.inner.config),
            &self.inner.tracker,
        );
        self.emit(SessionEvent::Created { group_id: group });
        session
    }

    // ========================================================================
    // Backend events
    // ========================================================================

    /// Deliver one voice backend callback to its session.
    pub async fn notify_backend(&self, event: BackendEvent) {
        let group = event.group_id();
        let Some(session) = self.session(group) else {
            debug!(group_id = %group, ?event, "Dropping backend event for group without session");
            return;
        };
        if session.backend_event(event).await.is_err() {
            debug!(group_id = %group, "Session closed before backend event was delivered");
        }
    }

    /// Forward every event from `events` until the channel closes or the
    /// dispatcher shuts down.
    pub fn listen_backend(&self, mut events: mpsc::Receiver<BackendEvent>) {
        let dispatcher = self.clone();
        let token = self.inner.shutdown.clone();
        self.inner.tracker.spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = events.recv() => match event {
                            Some(event) => dispatcher.notify_backend(event).await,
                            None => break,
                        },
                    }
                }
                debug!("Backend event pump stopped");
            }
            .instrument(info_span!("backend_pump")),
        );
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Evict idle sessions, purge expired cache entries and trim rate
    /// limiter state. Runs on the maintenance interval; callable directly.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let evicted_sessions = self.evict_idle().await;
        let purged_cache_entries = self.inner.ctx.resolver.cache().purge_expired();
        for entry in self.inner.sessions.iter() {
            entry.value().rate_limiter().retain_recent();
        }

        let report = MaintenanceReport {
            evicted_sessions,
            purged_cache_entries,
        };
        if report != MaintenanceReport::default() {
            info!(
                evicted = report.evicted_sessions,
                purged = report.purged_cache_entries,
                "Maintenance"
            );
        }
        report
    }

    async fn evict_idle(&self) -> usize {
        let idle_timeout = self.inner.config.session_idle_timeout;
        // clone handles out so no registry shard is locked across an await
        let sessions: Vec<SessionHandle> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let outcomes = join_all(sessions.iter().map(|s| s.evict_if_idle(idle_timeout))).await;

        let mut evicted = 0;
        for (session, outcome) in sessions.iter().zip(outcomes) {
            let group = session.group_id();
            let idle = match outcome {
                Ok(Some(idle)) => idle,
                Ok(None) => continue,
                Err(_) => {
                    debug!(group_id = %group, "Removing closed session");
                    self.inner
                        .sessions
                        .remove_if(&group, |_, existing| existing.same_session(session));
                    continue;
                }
            };
            if self
                .inner
                .sessions
                .remove_if(&group, |_, existing| existing.same_session(session))
                .is_some()
            {
                evicted += 1;
                self.emit(SessionEvent::Evicted {
                    group_id: group,
                    idle_secs: idle.as_secs(),
                });
            }
        }
        evicted
    }

    // ========================================================================
    // Observability
    // ========================================================================

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.ctx.metrics.snapshot()
    }

    pub fn performance_monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.inner.ctx.metrics
    }

    pub fn health(&self) -> HealthReport {
        let pool = self.inner.ctx.resolver.pool();
        HealthReport {
            status: if self.is_alive() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            uptime_secs: self.inner.ctx.metrics.uptime().as_secs(),
            active_sessions: self.active_sessions(),
            timestamp: Utc::now(),
            cache: self.inner.ctx.resolver.cache().stats(),
            pool: PoolStats {
                size: pool.size(),
                in_flight: pool.in_flight(),
            },
            metrics: self.metrics(),
        }
    }

    /// Liveness: maintenance is running and no shutdown was requested.
    pub fn is_alive(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
            && self.inner.maintenance_alive.load(Ordering::SeqCst)
    }

    /// Registered sessions whose loop is still running.
    pub fn active_sessions(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .count()
    }

    pub fn session(&self, group: GroupId) -> Option<SessionHandle> {
        self.inner
            .sessions
            .get(&group)
            .map(|entry| entry.value().clone())
            .filter(|session| !session.is_closed())
    }

    pub fn session_state(&self, group: GroupId) -> Option<SessionState> {
        self.session(group).map(|session| session.state())
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.ctx.events
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.inner.ctx.events.subscribe())
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.inner.ctx.resolver
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop maintenance, stop every session (leaving voice chats) and wait
    /// for all background tasks to finish.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            self.inner.tracker.wait().await;
            return;
        }
        info!(sessions = self.inner.sessions.len(), "Shutting down dispatcher");
        self.inner.shutdown.cancel();

        let sessions: Vec<SessionHandle> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.inner.sessions.clear();
        join_all(sessions.iter().map(|session| session.shutdown())).await;

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("Dispatcher stopped");
    }

    fn emit(&self, event: SessionEvent) {
        self.inner.ctx.events.emit(CoreEvent::Session(event)).ok();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sessions", &self.inner.sessions.len())
            .field("resolver", &self.inner.ctx.resolver)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn spawn_maintenance(inner: &Arc<Inner>) {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let token = inner.shutdown.clone();
    let alive = Arc::clone(&inner.maintenance_alive);
    let period = inner.config.maintenance_interval;

    alive.store(true, Ordering::SeqCst);
    inner.tracker.spawn(
        async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Dispatcher { inner }.run_maintenance().await;
            }

            alive.store(false, Ordering::SeqCst);
            debug!("Maintenance task stopped");
        }
        .instrument(info_span!("maintenance")),
    );
}
