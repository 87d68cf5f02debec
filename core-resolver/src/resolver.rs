//! # Resolver
//!
//! Turns track references into playable metadata.
//!
//! ## Pipeline
//!
//! ```text
//! resolve(source)
//!   ├─ cache hit ──────────────────────────────> Ok(metadata)
//!   └─ miss
//!       └─ attempt 1..=max_retries+1
//!           ├─ wait for pool slot  ┐
//!           ├─ re-check cache      ├ shared per-attempt deadline
//!           ├─ extractor.extract() ┘
//!           ├─ Ok ─> cache.insert ─────────────> Ok(metadata)
//!           ├─ NotFound/Unsupported ───────────> Err (no retry)
//!           └─ Timeout/Upstream ─> backoff, next attempt (slot released)
//! ```
//!
//! The cache is re-checked after the slot is acquired because another
//! session may have resolved the same reference while this call waited.

use crate::cache::ResolutionCache;
use crate::error::{ResolutionError, Result};
use crate::pool::WorkerPool;
use bridge_traits::{Extractor, ResolvedMetadata};
use core_runtime::config::{OrchestratorConfig, RetryPolicy};
use core_runtime::metrics::{MetricKind, PerformanceMonitor};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, instrument, warn};

/// Shared resolution service. Clone-free: hold it in an `Arc`.
pub struct Resolver {
    extractor: Arc<dyn Extractor>,
    cache: Arc<ResolutionCache>,
    pool: WorkerPool,
    timeout: Duration,
    retry: RetryPolicy,
    metrics: Arc<PerformanceMonitor>,
}

impl Resolver {
    /// Build a resolver with its own cache and pool sized from `config`.
    pub fn new(
        extractor: Arc<dyn Extractor>,
        config: &OrchestratorConfig,
        metrics: Arc<PerformanceMonitor>,
    ) -> Self {
        Self::with_parts(
            extractor,
            Arc::new(ResolutionCache::new(
                config.resolution_cache_capacity,
                config.resolution_cache_ttl,
            )),
            WorkerPool::new(config.resolver_pool_size),
            config.resolver_timeout,
            config.resolver_retry_policy(),
            metrics,
        )
    }

    pub fn with_parts(
        extractor: Arc<dyn Extractor>,
        cache: Arc<ResolutionCache>,
        pool: WorkerPool,
        timeout: Duration,
        retry: RetryPolicy,
        metrics: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            extractor,
            cache,
            pool,
            timeout,
            retry,
            metrics,
        }
    }

    /// Resolve `source` with the configured per-attempt timeout.
    pub async fn resolve(&self, source: &str) -> Result<ResolvedMetadata> {
        self.resolve_with_timeout(source, self.timeout).await
    }

    /// Resolve `source`, giving each attempt at most `timeout` (pool wait
    /// included).
    #[instrument(skip(self), fields(source = %source))]
    pub async fn resolve_with_timeout(
        &self,
        source: &str,
        timeout: Duration,
    ) -> Result<ResolvedMetadata> {
        if let Some(hit) = self.cache.get(source) {
            debug!("Resolution cache hit");
            return Ok(hit);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                "Resolution attempt {}/{}",
                attempt,
                self.retry.max_attempts()
            );

            let err = match self.attempt(source, timeout).await {
                Ok(metadata) => return Ok(metadata),
                Err(err) if err.is_retryable() => err,
                Err(err) => {
                    debug!(error = %err, "Resolution failed permanently");
                    return Err(err);
                }
            };

            match self.retry.next_delay(attempt) {
                Some(delay) => {
                    warn!(
                        error = %err,
                        "Resolution attempt {} failed, retrying in {:?}",
                        attempt, delay
                    );
                    sleep(delay).await;
                }
                None => {
                    error!(error = %err, attempts = attempt, "Resolution retries exhausted");
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, source: &str, timeout: Duration) -> Result<ResolvedMetadata> {
        let deadline = Instant::now() + timeout;
        let _permit = self.pool.acquire_until(deadline).await?;

        if let Some(hit) = self.cache.peek(source) {
            debug!("Resolved by a concurrent call while waiting for a worker");
            return Ok(hit);
        }

        let started = Instant::now();
        let metadata = timeout_at(deadline, self.extractor.extract(source))
            .await
            .map_err(|_| ResolutionError::Timeout)??;

        self.metrics
            .record(MetricKind::Extraction, started.elapsed());
        self.cache.insert(source, metadata.clone());
        debug!(title = %metadata.title, "Resolved");
        Ok(metadata)
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("pool_size", &self.pool.size())
            .field("in_flight", &self.pool.in_flight())
            .field("cached", &self.cache.len())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}
