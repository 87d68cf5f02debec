//! # Resolution Cache
//!
//! Process-wide map from track reference to resolved metadata.
//!
//! Entries live for a fixed TTL after insertion and the map is bounded by an
//! LRU capacity, so a burst of unique requests cannot grow it without limit.
//! Expired entries are dropped lazily on lookup and in bulk by
//! [`ResolutionCache::purge_expired`], which the registry's maintenance tick
//! calls.
//!
//! Keys are the reference with surrounding whitespace trimmed; matching is
//! otherwise exact.

use bridge_traits::ResolvedMetadata;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    metadata: ResolvedMetadata,
    expires_at: Instant,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// TTL + LRU cache of resolved tracks.
#[derive(Debug)]
pub struct ResolutionCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolutionCache {
    /// Create a cache holding at most `capacity` entries (minimum 1) for
    /// `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a fresh entry, counting the hit or miss.
    pub fn get(&self, source: &str) -> Option<ResolvedMetadata> {
        let found = self.lookup(source);
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Look up a fresh entry without touching the hit/miss counters.
    pub fn peek(&self, source: &str) -> Option<ResolvedMetadata> {
        self.lookup(source)
    }

    fn lookup(&self, source: &str) -> Option<ResolvedMetadata> {
        let key = cache_key(source);
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.metadata.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Store `metadata` for `source`, replacing any previous entry and
    /// restarting its TTL.
    pub fn insert(&self, source: &str, metadata: ResolvedMetadata) {
        let entry = CacheEntry {
            metadata,
            expires_at: Instant::now() + self.ttl,
        };
        if let Some((evicted, _)) = self.entries.lock().push(cache_key(source).to_string(), entry)
        {
            if evicted != cache_key(source) {
                debug!(evicted = %evicted, "Resolution cache full, evicted least recently used entry");
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn remove(&self, source: &str) -> bool {
        self.entries.lock().pop(cache_key(source)).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, expired ones not yet purged included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

fn cache_key(source: &str) -> &str {
    source.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::StreamHandle;

    fn meta(title: &str) -> ResolvedMetadata {
        ResolvedMetadata::new(title, Duration::from_secs(200), StreamHandle::new(title))
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_and_miss_counters() {
        let cache = ResolutionCache::new(8, Duration::from_secs(600));
        assert!(cache.get("song").is_none());

        cache.insert("song", meta("Song"));
        assert_eq!(cache.get("  song ").unwrap().title, "Song");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResolutionCache::new(8, Duration::from_secs(10));
        cache.insert("song", meta("Song"));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.peek("song").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.peek("song").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_keeps_fresh_entries() {
        let cache = ResolutionCache::new(8, Duration::from_secs(10));
        cache.insert("old", meta("Old"));
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.insert("new", meta("New"));
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("new").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_used() {
        let cache = ResolutionCache::new(2, Duration::from_secs(600));
        cache.insert("a", meta("A"));
        cache.insert("b", meta("B"));
        assert!(cache.peek("a").is_some()); // touch a
        cache.insert("c", meta("C"));

        assert!(cache.peek("a").is_some());
        assert!(cache.peek("b").is_none());
        assert!(cache.peek("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_and_clear() {
        let cache = ResolutionCache::new(4, Duration::from_secs(600));
        cache.insert("a", meta("A"));
        cache.insert("b", meta("B"));
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
