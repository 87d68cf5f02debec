//! Dispatcher tests
//!
//! End-to-end command flows through the registry, the shared resolver and
//! real session loops, with stub collaborators and paused tokio time.

use bridge_traits::{
    BackendEvent, ExtractError, Extractor, GroupId, JoinError, ResolvedMetadata, StreamHandle,
    VoiceBackend,
};
use core_playback::{PlaybackError, RateLimitRule, Reply, Requester, SessionState};
use core_runtime::config::OrchestratorConfig;
use core_runtime::events::{CoreEvent, SessionEvent};
use core_runtime::metrics::MetricKind;
use core_service::{CoreError, Dispatcher, HealthStatus};
use mockall::mock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

const GROUP_A: GroupId = GroupId::new(-1001);
const GROUP_B: GroupId = GroupId::new(-1002);

// ============================================================================
// Stubs
// ============================================================================

#[derive(Default)]
struct StubExtractor {
    delays: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
}

impl StubExtractor {
    fn with_delay(self, source: &str, delay: Duration) -> Self {
        self.delays.lock().insert(source.to_string(), delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Extractor for StubExtractor {
    async fn extract(&self, source: &str) -> Result<ResolvedMetadata, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().get(source).copied().unwrap_or_default();
        sleep(delay).await;
        Ok(ResolvedMetadata::new(
            source,
            Duration::from_secs(240),
            StreamHandle::new(format!("stream://{}", source)),
        ))
    }
}

#[derive(Default)]
struct StubBackend {
    streams: Mutex<Vec<(GroupId, String)>>,
    leaves: AtomicUsize,
}

impl StubBackend {
    fn streams_for(&self, group: GroupId) -> Vec<String> {
        self.streams
            .lock()
            .iter()
            .filter(|(g, _)| *g == group)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl VoiceBackend for StubBackend {
    async fn join_and_stream(&self, group: GroupId, stream: &StreamHandle) -> Result<(), JoinError> {
        self.streams.lock().push((group, stream.to_string()));
        Ok(())
    }

    async fn pause(&self, _group: GroupId) -> bridge_traits::error::Result<()> {
        Ok(())
    }

    async fn resume(&self, _group: GroupId) -> bridge_traits::error::Result<()> {
        Ok(())
    }

    async fn leave(&self, _group: GroupId) -> bridge_traits::error::Result<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

mock! {
    pub Backend {}

    #[async_trait::async_trait]
    impl VoiceBackend for Backend {
        async fn join_and_stream(&self, group: GroupId, stream: &StreamHandle) -> Result<(), JoinError>;
        async fn pause(&self, group: GroupId) -> bridge_traits::error::Result<()>;
        async fn resume(&self, group: GroupId) -> bridge_traits::error::Result<()>;
        async fn leave(&self, group: GroupId) -> bridge_traits::error::Result<()>;
    }
}

fn user(id: i64) -> Requester {
    Requester::user(id)
}

fn dispatcher(
    config: OrchestratorConfig,
    extractor: &Arc<StubExtractor>,
    backend: &Arc<StubBackend>,
) -> Dispatcher {
    Dispatcher::new(
        config,
        Arc::clone(extractor) as Arc<dyn Extractor>,
        Arc::clone(backend) as Arc<dyn VoiceBackend>,
    )
    .unwrap()
}

async fn wait_for_state(dispatcher: &Dispatcher, group: GroupId, state: SessionState) {
    for _ in 0..1000 {
        if dispatcher.session_state(group) == Some(state) {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {}", group, state);
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_play_then_skip_last_track() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let dispatcher = dispatcher(OrchestratorConfig::unthrottled(), &extractor, &backend);

    let reply = dispatcher.play(GROUP_A, "trackA", user(1)).await.unwrap();
    assert!(reply.to_string().starts_with("Now playing: trackA"));
    assert_eq!(dispatcher.session_state(GROUP_A), Some(SessionState::Playing));

    let reply = dispatcher.skip(GROUP_A, user(1)).await.unwrap();
    assert_eq!(reply.to_string(), "Skipped: trackA");
    assert_eq!(dispatcher.session_state(GROUP_A), Some(SessionState::Idle));
    assert!(dispatcher.queue(GROUP_A).await.is_empty());
    assert_eq!(backend.leaves.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fourth_play_is_rejected_when_queue_full() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let config = OrchestratorConfig::builder()
        .max_queue_length(3)
        .command_cooldown(Duration::ZERO)
        .per_user_limit(0, Duration::from_secs(60))
        .build()
        .unwrap();
    let dispatcher = dispatcher(config, &extractor, &backend);

    dispatcher.play(GROUP_A, "a", user(1)).await.unwrap();
    let replies = [
        dispatcher.play(GROUP_A, "b", user(1)).await,
        dispatcher.play(GROUP_A, "c", user(1)).await,
        dispatcher.play(GROUP_A, "d", user(1)).await,
    ];

    assert!(matches!(replies[0], Ok(Reply::Queued { position: 2, .. })));
    assert!(matches!(replies[1], Ok(Reply::Queued { position: 3, .. })));
    assert_eq!(
        replies[2].as_ref().unwrap_err(),
        &PlaybackError::QueueFull { max: 3 }
    );
    assert_eq!(dispatcher.queue(GROUP_A).await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fifo_order_across_track_ends() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let dispatcher = dispatcher(OrchestratorConfig::unthrottled(), &extractor, &backend);
    let (tx, rx) = mpsc::channel(8);
    dispatcher.listen_backend(rx);

    dispatcher.play(GROUP_A, "one", user(1)).await.unwrap();
    dispatcher.play(GROUP_A, "two", user(2)).await.unwrap();
    dispatcher.play(GROUP_A, "three", user(3)).await.unwrap();

    for _ in 0..3 {
        tx.send(BackendEvent::TrackEnded { group_id: GROUP_A })
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
    }
    wait_for_state(&dispatcher, GROUP_A, SessionState::Idle).await;

    assert_eq!(
        backend.streams_for(GROUP_A),
        ["stream://one", "stream://two", "stream://three"]
    );
}

// ============================================================================
// Isolation and shared services
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_groups_do_not_block_each_other_with_single_worker() {
    let extractor = Arc::new(
        StubExtractor::default()
            .with_delay("slow", Duration::from_secs(10))
            .with_delay("other", Duration::from_secs(1)),
    );
    let backend = Arc::new(StubBackend::default());
    let config = OrchestratorConfig::builder()
        .resolver_pool_size(1)
        .command_cooldown(Duration::ZERO)
        .build()
        .unwrap();
    let dispatcher = dispatcher(config, &extractor, &backend);

    let a = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.play(GROUP_A, "slow", user(1)).await }
    });
    sleep(Duration::from_millis(10)).await;
    let b = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.play(GROUP_B, "other", user(2)).await }
    });
    wait_for_state(&dispatcher, GROUP_B, SessionState::Loading).await;

    // both sessions keep answering while their resolutions are outstanding
    let started = Instant::now();
    assert_eq!(
        dispatcher.queue(GROUP_B).await.state,
        SessionState::Loading
    );
    assert_eq!(
        dispatcher.pause(GROUP_A, user(1)).await.unwrap_err(),
        PlaybackError::InvalidState {
            command: "pause",
            state: SessionState::Loading
        }
    );
    assert!(started.elapsed() < Duration::from_secs(1));

    assert!(matches!(a.await.unwrap(), Ok(Reply::NowPlaying(_))));
    assert!(matches!(b.await.unwrap(), Ok(Reply::NowPlaying(_))));
    assert_eq!(dispatcher.health().pool.size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resolution_cache_is_shared_across_groups() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let dispatcher = dispatcher(OrchestratorConfig::unthrottled(), &extractor, &backend);

    dispatcher.play(GROUP_A, "same song", user(1)).await.unwrap();
    dispatcher.play(GROUP_B, "same song", user(2)).await.unwrap();

    assert_eq!(extractor.calls(), 1);
    assert_eq!(dispatcher.health().cache.hits, 1);
    assert_eq!(dispatcher.active_sessions(), 2);
}

// ============================================================================
// Gates
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_user_window_denies_request_over_limit() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let config = OrchestratorConfig::builder()
        .command_cooldown(Duration::ZERO)
        .per_user_limit(3, Duration::from_secs(60))
        .build()
        .unwrap();
    let dispatcher = dispatcher(config, &extractor, &backend);

    for source in ["a", "b", "c"] {
        dispatcher.play(GROUP_A, source, user(1)).await.unwrap();
    }
    let err = dispatcher.play(GROUP_A, "d", user(1)).await.unwrap_err();

    match err {
        PlaybackError::RateLimited(denial) => assert_eq!(denial.rule, RateLimitRule::UserWindow),
        other => panic!("expected rate limit, got {:?}", other),
    }
    // denied commands change nothing
    assert_eq!(dispatcher.queue(GROUP_A).await.len(), 3);
    // other users are unaffected
    assert!(dispatcher.play(GROUP_A, "e", user(2)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_session_cooldown_rejects_rapid_commands() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let config = OrchestratorConfig::builder()
        .command_cooldown(Duration::from_secs(30))
        .per_user_limit(0, Duration::from_secs(60))
        .build()
        .unwrap();
    let dispatcher = dispatcher(config, &extractor, &backend);

    dispatcher.play(GROUP_A, "a", user(1)).await.unwrap();
    let err = dispatcher.skip(GROUP_A, user(2)).await.unwrap_err();

    assert!(matches!(
        err,
        PlaybackError::RateLimited(denial) if denial.rule == RateLimitRule::Cooldown
    ));
    assert!(err.to_string().starts_with("Please wait"));
    assert_eq!(dispatcher.session_state(GROUP_A), Some(SessionState::Playing));
}

#[tokio::test(start_paused = true)]
async fn test_admin_only_controls() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let config = OrchestratorConfig::builder()
        .command_cooldown(Duration::ZERO)
        .per_user_limit(0, Duration::from_secs(60))
        .admin_only_controls(true)
        .build()
        .unwrap();
    let dispatcher = dispatcher(config, &extractor, &backend);

    dispatcher.play(GROUP_A, "a", user(1)).await.unwrap();

    assert_eq!(
        dispatcher.skip(GROUP_A, user(1)).await.unwrap_err(),
        PlaybackError::PermissionDenied
    );
    assert_eq!(
        dispatcher.session_state(GROUP_A),
        Some(SessionState::Playing)
    );
    assert!(dispatcher.skip(GROUP_A, Requester::admin(9)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_commands_without_session() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let dispatcher = dispatcher(OrchestratorConfig::unthrottled(), &extractor, &backend);

    assert_eq!(
        dispatcher.pause(GROUP_A, user(1)).await.unwrap_err(),
        PlaybackError::NoActiveSession
    );
    assert_eq!(
        dispatcher.leave(GROUP_A, user(1)).await.unwrap_err(),
        PlaybackError::NoActiveSession
    );
    assert_eq!(dispatcher.queue(GROUP_A).await.to_string(), "Queue is empty");
    assert_eq!(dispatcher.active_sessions(), 0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_session_is_evicted_and_recreated() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let config = OrchestratorConfig::builder()
        .command_cooldown(Duration::ZERO)
        .per_user_limit(0, Duration::from_secs(60))
        .session_idle_timeout(Duration::from_secs(60))
        .maintenance_interval(Duration::from_secs(10))
        .build()
        .unwrap();
    let dispatcher = dispatcher(config, &extractor, &backend);
    let mut events = dispatcher.subscribe().filter(|e| matches!(e, CoreEvent::Session(_)));

    dispatcher.play(GROUP_A, "a", user(1)).await.unwrap();
    dispatcher.skip(GROUP_A, user(1)).await.unwrap();
    assert_eq!(dispatcher.session_state(GROUP_A), Some(SessionState::Idle));
    assert_eq!(
        events.recv().await.unwrap(),
        CoreEvent::Session(SessionEvent::Created { group_id: GROUP_A })
    );

    sleep(Duration::from_secs(75)).await;

    match events.recv().await.unwrap() {
        CoreEvent::Session(SessionEvent::Evicted {
            group_id,
            idle_secs,
        }) => {
            assert_eq!(group_id, GROUP_A);
            assert!(idle_secs >= 60);
        }
        other => panic!("expected eviction, got {:?}", other),
    }
    assert_eq!(dispatcher.active_sessions(), 0);

    dispatcher.play(GROUP_A, "b", user(1)).await.unwrap();
    assert_eq!(dispatcher.active_sessions(), 1);
}

// real time: the cooldown runs on the wall clock
#[tokio::test]
async fn test_stop_tears_down_session_and_rate_limits() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let config = OrchestratorConfig::builder()
        .command_cooldown(Duration::from_millis(200))
        .per_user_limit(0, Duration::from_secs(60))
        .build()
        .unwrap();
    let dispatcher = dispatcher(config, &extractor, &backend);
    let mut events = dispatcher.subscribe().filter(|e| matches!(e, CoreEvent::Session(_)));

    dispatcher.play(GROUP_A, "a", user(1)).await.unwrap();
    sleep(Duration::from_millis(250)).await;
    let reply = dispatcher.stop(GROUP_A, user(1)).await.unwrap();

    assert_eq!(reply, Reply::Stopped { cleared: 1 });
    assert!(dispatcher.session(GROUP_A).is_none());
    assert_eq!(dispatcher.active_sessions(), 0);
    assert_eq!(backend.leaves.load(Ordering::SeqCst), 1);

    // the old session's cooldown is gone with it
    let reply = dispatcher.play(GROUP_A, "b", user(1)).await.unwrap();
    assert!(reply.to_string().starts_with("Now playing: b"));
    for _ in 0..2 {
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Session(SessionEvent::Created { group_id: GROUP_A })
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_stop_keeps_session() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let dispatcher = dispatcher(OrchestratorConfig::unthrottled(), &extractor, &backend);

    dispatcher.play(GROUP_A, "a", user(1)).await.unwrap();
    dispatcher.skip(GROUP_A, user(1)).await.unwrap();

    assert_eq!(
        dispatcher.stop(GROUP_A, user(1)).await.unwrap_err(),
        PlaybackError::NoActiveSession
    );
    assert_eq!(dispatcher.session_state(GROUP_A), Some(SessionState::Idle));
}

#[tokio::test(start_paused = true)]
async fn test_playing_session_is_not_evicted() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let config = OrchestratorConfig::builder()
        .session_idle_timeout(Duration::from_secs(60))
        .build()
        .unwrap();
    let dispatcher = dispatcher(config, &extractor, &backend);

    dispatcher.play(GROUP_A, "a", user(1)).await.unwrap();
    sleep(Duration::from_secs(120)).await;

    let report = dispatcher.run_maintenance().await;
    assert_eq!(report.evicted_sessions, 0);
    assert_eq!(dispatcher.session_state(GROUP_A), Some(SessionState::Playing));
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_purges_expired_cache_entries() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let config = OrchestratorConfig::builder()
        .resolution_cache_ttl(Duration::from_secs(5))
        .maintenance_interval(Duration::from_secs(3600))
        .build()
        .unwrap();
    let dispatcher = dispatcher(config, &extractor, &backend);

    dispatcher.play(GROUP_A, "a", user(1)).await.unwrap();
    sleep(Duration::from_secs(6)).await;

    assert_eq!(dispatcher.run_maintenance().await.purged_cache_entries, 1);
    assert!(dispatcher.resolver().cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_health_and_metrics() {
    let extractor = Arc::new(StubExtractor::default().with_delay("a", Duration::from_millis(400)));
    let backend = Arc::new(StubBackend::default());
    let dispatcher = dispatcher(OrchestratorConfig::unthrottled(), &extractor, &backend);

    dispatcher.play(GROUP_A, "a", user(1)).await.unwrap();

    let health = dispatcher.health();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.active_sessions, 1);
    assert_eq!(health.metrics.extraction.count, 1);
    assert_eq!(health.metrics.playback_start.count, 1);
    assert_eq!(
        dispatcher
            .performance_monitor()
            .summary(MetricKind::CommandResponse)
            .count,
        1
    );

    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["active_sessions"], 1);
    assert_eq!(json["pool"]["in_flight"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_voice_chats() {
    let extractor = Arc::new(StubExtractor::default());
    let mut backend = MockBackend::new();
    backend
        .expect_join_and_stream()
        .times(2)
        .returning(|_, _| Ok(()));
    backend.expect_leave().times(2).returning(|_| Ok(()));

    let dispatcher = Dispatcher::new(
        OrchestratorConfig::unthrottled(),
        Arc::clone(&extractor) as Arc<dyn Extractor>,
        Arc::new(backend),
    )
    .unwrap();
    dispatcher.play(GROUP_A, "a", user(1)).await.unwrap();
    dispatcher.play(GROUP_B, "b", user(2)).await.unwrap();
    assert!(dispatcher.is_alive());

    dispatcher.shutdown().await;

    assert!(!dispatcher.is_alive());
    assert_eq!(dispatcher.health().status, HealthStatus::Degraded);
    assert_eq!(dispatcher.active_sessions(), 0);
    assert_eq!(
        dispatcher.play(GROUP_A, "c", user(1)).await.unwrap_err(),
        PlaybackError::SessionClosed
    );
}

#[tokio::test(start_paused = true)]
async fn test_backend_events_for_unknown_groups_are_dropped() {
    let extractor = Arc::new(StubExtractor::default());
    let backend = Arc::new(StubBackend::default());
    let dispatcher = dispatcher(OrchestratorConfig::unthrottled(), &extractor, &backend);

    dispatcher
        .notify_backend(BackendEvent::TrackEnded { group_id: GROUP_B })
        .await;
    assert_eq!(dispatcher.active_sessions(), 0);
}

#[test]
fn test_new_requires_runtime() {
    let err = Dispatcher::new(
        OrchestratorConfig::default(),
        Arc::new(StubExtractor::default()),
        Arc::new(StubBackend::default()),
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::InitializationFailed(_)));
}

#[tokio::test]
async fn test_new_rejects_invalid_config() {
    let mut config = OrchestratorConfig::default();
    config.resolver_pool_size = 0;
    let err = Dispatcher::new(
        config,
        Arc::new(StubExtractor::default()),
        Arc::new(StubBackend::default()),
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::Runtime(_)));
}
