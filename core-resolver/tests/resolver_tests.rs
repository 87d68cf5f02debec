//! Resolver pipeline tests
//!
//! Covers caching, bounded concurrency through the shared pool, timeouts
//! and retry behaviour against a hand-written extractor stub.

use bridge_traits::{ExtractError, Extractor, ResolvedMetadata, StreamHandle};
use core_resolver::{ResolutionCache, ResolutionError, Resolver, WorkerPool};
use core_runtime::config::{Backoff, OrchestratorConfig, RetryPolicy};
use core_runtime::metrics::PerformanceMonitor;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Stub Extractor
// ============================================================================

#[derive(Default)]
struct StubExtractor {
    delay: Duration,
    /// Failures handed out before calls start succeeding.
    failures: Mutex<VecDeque<ExtractError>>,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl StubExtractor {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn failing_first(self, failures: impl IntoIterator<Item = ExtractError>) -> Self {
        self.failures.lock().extend(failures);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Extractor for StubExtractor {
    async fn extract(&self, source: &str) -> Result<ResolvedMetadata, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(ResolvedMetadata::new(
            format!("Title of {}", source),
            Duration::from_secs(200),
            StreamHandle::new(format!("stream://{}", source)),
        ))
    }
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_retries,
        Backoff::new(Duration::from_millis(200), 2.0, Duration::from_secs(2)),
    )
}

fn build(stub: &Arc<StubExtractor>, pool: usize, timeout: Duration, retry: RetryPolicy) -> Resolver {
    Resolver::with_parts(
        Arc::clone(stub) as Arc<dyn Extractor>,
        Arc::new(ResolutionCache::new(64, Duration::from_secs(600))),
        WorkerPool::new(pool),
        timeout,
        retry,
        Arc::new(PerformanceMonitor::new()),
    )
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cache_hit_within_ttl_skips_extractor() {
    let stub = Arc::new(StubExtractor::default());
    let resolver = build(&stub, 2, Duration::from_secs(30), fast_retry(3));

    let first = resolver.resolve("lofi beats").await.unwrap();
    let second = resolver.resolve("lofi beats").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(stub.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_entry_expires_after_ttl() {
    let stub = Arc::new(StubExtractor::default());
    let config = OrchestratorConfig::builder()
        .resolution_cache_ttl(Duration::from_secs(10))
        .build()
        .unwrap();
    let resolver = Resolver::new(
        Arc::clone(&stub) as Arc<dyn Extractor>,
        &config,
        Arc::new(PerformanceMonitor::new()),
    );

    resolver.resolve("song").await.unwrap();
    tokio::time::advance(Duration::from_secs(11)).await;
    resolver.resolve("song").await.unwrap();

    assert_eq!(stub.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_waiter_reuses_result_resolved_meanwhile() {
    // Pool of one: the second call waits for the slot, then finds the
    // first call's result in the cache.
    let stub = Arc::new(StubExtractor::with_delay(Duration::from_secs(2)));
    let resolver = Arc::new(build(&stub, 1, Duration::from_secs(30), fast_retry(0)));

    let a = tokio::spawn({
        let resolver = Arc::clone(&resolver);
        async move { resolver.resolve("same").await }
    });
    let b = tokio::spawn({
        let resolver = Arc::clone(&resolver);
        async move { resolver.resolve("same").await }
    });

    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());
    assert_eq!(stub.calls(), 1);
}

// ============================================================================
// Bounded Concurrency
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pool_bounds_in_flight_extractions() {
    let stub = Arc::new(StubExtractor::with_delay(Duration::from_secs(1)));
    let resolver = Arc::new(build(&stub, 2, Duration::from_secs(30), fast_retry(0)));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve(&format!("track-{}", i)).await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(stub.calls(), 6);
    assert_eq!(stub.max_running(), 2);
    assert_eq!(resolver.pool().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pool_wait_counts_against_timeout() {
    let stub = Arc::new(StubExtractor::with_delay(Duration::from_secs(20)));
    let resolver = Arc::new(build(&stub, 1, Duration::from_secs(30), fast_retry(0)));

    let holder = tokio::spawn({
        let resolver = Arc::clone(&resolver);
        async move { resolver.resolve("long").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Waits ~20s for the slot, leaving ~10s for a 20s extraction.
    let err = resolver.resolve("other").await.unwrap_err();
    assert_eq!(err, ResolutionError::Timeout);
    assert!(holder.await.unwrap().is_ok());
}

// ============================================================================
// Timeouts and Retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_extractor_times_out_after_retries() {
    let stub = Arc::new(StubExtractor::with_delay(Duration::from_secs(60)));
    let resolver = build(&stub, 1, Duration::from_secs(5), fast_retry(2));

    let err = resolver.resolve("slow").await.unwrap_err();

    assert_eq!(err, ResolutionError::Timeout);
    assert_eq!(stub.calls(), 3);
    // timed-out calls release their slot
    assert_eq!(resolver.pool().available(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_success() {
    let stub = Arc::new(
        StubExtractor::default().failing_first([
            ExtractError::Upstream("HTTP 429".into()),
            ExtractError::Upstream("HTTP 503".into()),
        ]),
    );
    let resolver = build(&stub, 1, Duration::from_secs(5), fast_retry(3));

    let meta = resolver.resolve("flaky").await.unwrap();

    assert_eq!(meta.title, "Title of flaky");
    assert_eq!(stub.calls(), 3);
    assert!(resolver.cache().peek("flaky").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_source_fails_immediately() {
    let stub = Arc::new(
        StubExtractor::default()
            .failing_first([ExtractError::Unsupported("ftp://host/file".into())]),
    );
    let resolver = build(&stub, 1, Duration::from_secs(5), fast_retry(3));

    let err = resolver.resolve("ftp://host/file").await.unwrap_err();

    assert_eq!(err, ResolutionError::Unsupported("ftp://host/file".into()));
    assert_eq!(stub.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_follow_policy() {
    let stub = Arc::new(StubExtractor::default().failing_first([
        ExtractError::Upstream("a".into()),
        ExtractError::Upstream("b".into()),
    ]));
    let resolver = build(&stub, 1, Duration::from_secs(5), fast_retry(2));

    let started = tokio::time::Instant::now();
    resolver.resolve("x").await.unwrap();

    // 200ms + 400ms of backoff, extraction itself takes no time
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(600), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(700), "elapsed {:?}", elapsed);
}
