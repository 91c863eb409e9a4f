//! Query result cache using moka
//!
//! Backs optimistic first paints: a screen reads whatever is cached for its
//! query while a fresh fetch runs, then overwrites the entry with the result.
//!
//! Expiry is lazy and exact: an entry is served while
//! `now - inserted_at <= ttl` and is a miss afterwards, independent of when
//! moka gets around to evicting it. [`QueryCache::sweep`] reclaims expired
//! entries eagerly for callers that want to bound memory.
//!
//! Every write stamps its entry with a fresh generation, and expiry removes a
//! key only while it still holds the generation found expired, so a `set`
//! racing with a lazy removal is never lost.

use crate::clock::{Clock, SystemClock};
use moka::ops::compute::{CompResult, Op};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Default maximum number of entries
pub const DEFAULT_CAPACITY: u64 = 100;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries in cache (expired but unswept entries included)
    pub entry_count: u64,
    /// Lookups served from cache
    pub hits: u64,
    /// Lookups that missed or found an expired entry
    pub misses: u64,
}

/// A cached payload with its lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    payload: V,
    inserted_at: Instant,
    ttl: Duration,
    generation: u64,
}

impl<V> CacheEntry<V> {
    /// Whether the entry is still servable at `now`
    #[inline]
    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) <= self.ttl
    }

    /// Entry age at `now`
    #[inline]
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }
}

/// Keyed cache of query results with per-entry TTL
///
/// Cheap to clone; clones share storage.
#[derive(Clone)]
pub struct QueryCache<V: Clone + Send + Sync + 'static> {
    inner: Cache<String, CacheEntry<V>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    generations: Arc<AtomicU64>,
}

impl<V: Clone + Send + Sync + 'static> QueryCache<V> {
    /// Create cache with max capacity and default TTL
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64, default_ttl: Duration) -> Self {
        Self::with_clock(max_capacity, default_ttl, Arc::new(SystemClock))
    }

    /// Create cache reading time from `clock`
    #[must_use]
    pub fn with_clock(max_capacity: u64, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
            clock,
            default_ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get payload if present and not expired
    ///
    /// An expired entry is removed and reported as a miss.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        match self.inner.get(key) {
            Some(entry) if entry.is_fresh(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.payload)
            }
            Some(entry) => {
                tracing::trace!(key, age_ms = entry.age(now).as_millis() as u64, "cache entry expired");
                self.remove_generation(key, entry.generation);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an entry with an explicit TTL
    pub fn set(&self, key: impl Into<String>, payload: V, ttl: Duration) {
        let entry = CacheEntry {
            payload,
            inserted_at: self.clock.now(),
            ttl,
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
        };
        self.inner.insert(key.into(), entry);
    }

    /// Insert or replace an entry with the default TTL
    #[inline]
    pub fn set_default(&self, key: impl Into<String>, payload: V) {
        self.set(key, payload, self.default_ttl);
    }

    /// Invalidate cache entry
    #[inline]
    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    /// Invalidate every entry whose key starts with `prefix`
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let keys: Vec<Arc<String>> = self
            .inner
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();
        for key in &keys {
            self.inner.invalidate(key.as_str());
        }
        keys.len()
    }

    /// Invalidate all entries
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Remove every expired entry now
    ///
    /// Returns the number of entries reclaimed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<(Arc<String>, u64)> = self
            .inner
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(key, entry)| (key, entry.generation))
            .collect();
        let reclaimed = expired
            .iter()
            .filter(|(key, generation)| self.remove_generation(key, *generation))
            .count();
        self.inner.run_pending_tasks();
        if reclaimed > 0 {
            tracing::debug!(reclaimed, "cache sweep");
        }
        reclaimed
    }

    /// Remove `key` only while it still holds the entry stamped `generation`
    fn remove_generation(&self, key: &str, generation: u64) -> bool {
        let result = self.inner.entry_by_ref(key).and_compute_with(|current| match current {
            Some(current) if current.value().generation == generation => Op::Remove,
            _ => Op::Nop,
        });
        matches!(result, CompResult::Removed(_))
    }

    /// Check if a fresh entry exists without touching hit/miss counters
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.inner.get(key).is_some_and(|entry| entry.is_fresh(now))
    }

    /// Default TTL used by [`Self::set_default`]
    #[inline]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks();
        CacheStats {
            entry_count: self.inner.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for QueryCache<V> {
    /// Create cache with default capacity (100 entries) and TTL (30s)
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl<V: Clone + Send + Sync + 'static> fmt::Debug for QueryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entry_count", &self.inner.entry_count())
            .field("default_ttl", &self.default_ttl)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
