//! Bounded LRU + TTL cache for assembled prompts.
//!
//! Keys are SHA-256 fingerprints of a template identity plus the canonical
//! JSON of its parameters, so identical calls collide on purpose and
//! differing calls never do.
//!
//! Entries are write-once: `set` on an existing key replaces the entry, it
//! never edits it in place. One coarse mutex guards the map and the LRU
//! index; it is held only for the duration of a single operation.
//!
//! # Example
//!
//! ```
//! use prompt_assembler::cache::PromptCache;
//! use prompt_assembler::params::ParameterSet;
//! use std::time::Duration;
//!
//! let cache = PromptCache::new(2, Duration::from_secs(60));
//! let params = ParameterSet::new().with("name", "World");
//!
//! cache.set("greeting", &params, "Hello World!", None);
//! assert_eq!(cache.get("greeting", &params).as_deref(), Some("Hello World!"));
//! assert_eq!(cache.get("other", &params), None);
//!
//! let stats = cache.stats();
//! assert_eq!((stats.hits, stats.misses), (1, 1));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::metrics::{MetricsSink, NoopMetrics, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
use crate::params::ParameterSet;
use crate::traits::{RealTimeProvider, TimeProvider};

/// Cache key for a template identity and its parameters.
#[must_use]
pub fn fingerprint(id: &str, params: &ParameterSet) -> String {
    fingerprint_parts(id, &params.canonical_json())
}

/// Cache key for an identity and an already-canonical payload.
#[must_use]
pub fn fingerprint_parts(id: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// One cached prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fingerprint.
    pub key: String,
    /// Assembled prompt.
    pub value: String,
    /// When the entry was stored.
    pub created_at: DateTime<Utc>,
    /// Lifetime measured from `created_at`.
    pub ttl: Duration,
    /// Last successful lookup (or `created_at`).
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    /// Returns true if `now - created_at > ttl`.
    ///
    /// A clock that moved backwards never expires an entry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at)
            .to_std()
            .is_ok_and(|age| age > self.ttl)
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that returned a value.
    pub hits: u64,
    /// Lookups that returned nothing.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Current number of entries.
    pub size: usize,
    /// Capacity.
    pub max_size: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0 with no lookups.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// `(last_accessed, created_at, sequence)`: least recently used sorts first.
type LruKey = (DateTime<Utc>, DateTime<Utc>, u64);

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, (CacheEntry, LruKey)>,
    lru: BTreeMap<LruKey, String>,
    sequence: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheState {
    fn next_lru_key(&mut self, entry: &CacheEntry) -> LruKey {
        self.sequence += 1;
        (entry.last_accessed, entry.created_at, self.sequence)
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let (entry, lru_key) = self.entries.remove(key)?;
        self.lru.remove(&lru_key);
        Some(entry)
    }

    fn insert(&mut self, entry: CacheEntry) {
        let lru_key = self.next_lru_key(&entry);
        self.lru.insert(lru_key, entry.key.clone());
        self.entries.insert(entry.key.clone(), (entry, lru_key));
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.lru.pop_first()?;
        self.entries.remove(&key);
        self.evictions += 1;
        Some(key)
    }
}

/// Thread-safe bounded prompt cache.
#[derive(Debug)]
pub struct PromptCache {
    state: Mutex<CacheState>,
    max_size: usize,
    default_ttl: Duration,
    clock: Arc<dyn TimeProvider>,
    metrics: Arc<dyn MetricsSink>,
}

impl PromptCache {
    /// Create a cache on the system clock.
    ///
    /// A `max_size` of zero disables storage.
    #[must_use]
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_size,
            default_ttl,
            clock: Arc::new(RealTimeProvider),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Use another clock.
    #[must_use]
    pub fn with_time_provider(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Record hits and misses into a metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Capacity.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// TTL used when `set` is given none.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poison_error) => {
                tracing::warn!(
                    error = %poison_error,
                    "Cache lock poisoned, using recovered state"
                );
                poison_error.into_inner()
            }
        }
    }

    /// Look up a prompt.
    #[must_use]
    pub fn get(&self, id: &str, params: &ParameterSet) -> Option<String> {
        self.get_by_key(&fingerprint(id, params))
    }

    /// Look up a prompt by fingerprint.
    ///
    /// Expired entries are removed and reported as absent. A hit refreshes
    /// the entry's `last_accessed`.
    #[must_use]
    pub fn get_by_key(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let found = {
            let mut state = self.lock();
            let lookup = state
                .entries
                .get(key)
                .map(|(entry, _)| entry.is_expired(now));

            match lookup {
                None => {
                    state.misses += 1;
                    None
                }
                Some(true) => {
                    state.remove(key);
                    state.expirations += 1;
                    state.misses += 1;
                    None
                }
                Some(false) => {
                    state.hits += 1;
                    state.remove(key).map(|mut entry| {
                        entry.last_accessed = now;
                        let value = entry.value.clone();
                        state.insert(entry);
                        value
                    })
                }
            }
        };

        if found.is_some() {
            tracing::debug!(key = %short(key), "Cache hit");
            self.metrics.increment_counter(CACHE_HITS_TOTAL, &[]);
        } else {
            tracing::debug!(key = %short(key), "Cache miss");
            self.metrics.increment_counter(CACHE_MISSES_TOTAL, &[]);
        }
        found
    }

    /// Store a prompt. `ttl` of `None` uses the default TTL.
    pub fn set(
        &self,
        id: &str,
        params: &ParameterSet,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) {
        self.set_by_key(fingerprint(id, params), value, ttl);
    }

    /// Store a prompt under a fingerprint.
    ///
    /// An existing entry under the same key is replaced, resetting its
    /// timestamps. Otherwise, at capacity, exactly one least-recently-used
    /// entry is evicted first.
    pub fn set_by_key(&self, key: String, value: impl Into<String>, ttl: Option<Duration>) {
        if self.max_size == 0 {
            return;
        }
        let now = self.clock.now();
        let entry = CacheEntry {
            key,
            value: value.into(),
            created_at: now,
            ttl: ttl.unwrap_or(self.default_ttl),
            last_accessed: now,
        };

        let evicted = {
            let mut state = self.lock();
            let replaced = state.remove(&entry.key).is_some();
            let evicted = if !replaced && state.entries.len() >= self.max_size {
                state.evict_lru()
            } else {
                None
            };
            state.insert(entry);
            evicted
        };

        if let Some(key) = evicted {
            tracing::debug!(key = %short(&key), "Evicted least recently used cache entry");
        }
    }

    /// Remove one entry. Returns true if it existed.
    pub fn invalidate(&self, id: &str, params: &ParameterSet) -> bool {
        self.invalidate_key(&fingerprint(id, params))
    }

    /// Remove one entry by fingerprint. Returns true if it existed.
    pub fn invalidate_key(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.lru.clear();
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, (entry, _))| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        state.expirations += expired.len() as u64;
        expired.len()
    }

    /// Number of entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the stored entry, without touching LRU order or counters.
    #[must_use]
    pub fn peek(&self, id: &str, params: &ParameterSet) -> Option<CacheEntry> {
        let key = fingerprint(id, params);
        self.lock().entries.get(&key).map(|(entry, _)| entry.clone())
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            size: state.entries.len(),
            max_size: self.max_size,
        }
    }
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetrics;
    use crate::traits::ManualTimeProvider;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn p(name: &str) -> ParameterSet {
        ParameterSet::new().with("name", name)
    }

    fn cache_with_clock(max_size: usize, ttl_secs: u64) -> (PromptCache, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::default());
        let cache = PromptCache::new(max_size, Duration::from_secs(ttl_secs))
            .with_time_provider(clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = fingerprint("t", &ParameterSet::new().with("x", 1).with("y", 2));
        let b = fingerprint("t", &ParameterSet::new().with("y", 2).with("x", 1));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, fingerprint("u", &ParameterSet::new().with("x", 1).with("y", 2)));
        assert_ne!(a, fingerprint("t", &ParameterSet::new().with("x", 1)));
        // The separator keeps id and payload from running together.
        assert_ne!(fingerprint_parts("ab", "c"), fingerprint_parts("a", "bc"));
    }

    #[test]
    fn test_set_then_get() {
        let (cache, _) = cache_with_clock(4, 60);
        cache.set("t", &p("a"), "A", None);
        assert_eq!(cache.get("t", &p("a")).as_deref(), Some("A"));
        assert_eq!(cache.get("t", &p("b")), None);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (cache, clock) = cache_with_clock(4, 60);
        cache.set("t", &p("a"), "A", None);

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.get("t", &p("a")).as_deref(), Some("A"));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("t", &p("a")), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_per_entry_ttl() {
        let (cache, clock) = cache_with_clock(4, 3600);
        cache.set("t", &p("short"), "S", Some(Duration::from_secs(5)));
        cache.set("t", &p("long"), "L", None);

        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.get("t", &p("short")), None);
        assert_eq!(cache.get("t", &p("long")).as_deref(), Some("L"));
    }

    #[test]
    fn test_access_does_not_extend_ttl() {
        let (cache, clock) = cache_with_clock(4, 10);
        cache.set("t", &p("a"), "A", None);
        for _ in 0..3 {
            clock.advance(Duration::from_secs(4));
            let _ = cache.get("t", &p("a"));
        }
        assert_eq!(cache.get("t", &p("a")), None);
    }

    #[test]
    fn test_lru_eviction_evicts_least_recently_accessed() {
        let (cache, clock) = cache_with_clock(2, 3600);
        cache.set("t", &p("a"), "A", None);
        clock.advance(Duration::from_secs(1));
        cache.set("t", &p("b"), "B", None);
        clock.advance(Duration::from_secs(1));

        // Touch A so B becomes least recently used.
        assert!(cache.get("t", &p("a")).is_some());
        clock.advance(Duration::from_secs(1));
        cache.set("t", &p("c"), "C", None);

        assert_eq!(cache.len(), 2);
        assert!(cache.peek("t", &p("b")).is_none());
        assert!(cache.peek("t", &p("a")).is_some());
        assert!(cache.peek("t", &p("c")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_ties_broken_by_creation_order() {
        // Frozen clock: every timestamp is equal.
        let (cache, _) = cache_with_clock(2, 3600);
        cache.set("t", &p("a"), "A", None);
        cache.set("t", &p("b"), "B", None);
        cache.set("t", &p("c"), "C", None);
        assert!(cache.peek("t", &p("a")).is_none());
        assert!(cache.peek("t", &p("b")).is_some());
    }

    #[test]
    fn test_set_existing_key_replaces_without_eviction() {
        let (cache, clock) = cache_with_clock(2, 60);
        cache.set("t", &p("a"), "A1", None);
        cache.set("t", &p("b"), "B", None);
        clock.advance(Duration::from_secs(50));
        cache.set("t", &p("a"), "A2", None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        let entry = cache.peek("t", &p("a")).unwrap();
        assert_eq!(entry.value, "A2");
        assert_eq!(entry.created_at, clock.now());

        // created_at was reset, so A outlives B.
        clock.advance(Duration::from_secs(20));
        assert_eq!(cache.get("t", &p("a")).as_deref(), Some("A2"));
        assert_eq!(cache.get("t", &p("b")), None);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let (cache, _) = cache_with_clock(4, 60);
        cache.set("t", &p("a"), "A", None);
        cache.set("t", &p("b"), "B", None);

        assert!(cache.invalidate("t", &p("a")));
        assert!(!cache.invalidate("t", &p("a")));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = cache_with_clock(4, 10);
        cache.set("t", &p("a"), "A", None);
        cache.set("t", &p("b"), "B", Some(Duration::from_secs(100)));
        clock.advance(Duration::from_secs(11));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = PromptCache::new(0, Duration::from_secs(60));
        cache.set("t", &p("a"), "A", None);
        assert!(cache.is_empty());
        assert_eq!(cache.get("t", &p("a")), None);
    }

    #[test]
    fn test_stats_and_metrics() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let cache = PromptCache::new(4, Duration::from_secs(60)).with_metrics(metrics.clone());
        cache.set("t", &p("a"), "A", None);
        let _ = cache.get("t", &p("a"));
        let _ = cache.get("t", &p("a"));
        let _ = cache.get("t", &p("z"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, 4);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.counter(CACHE_HITS_TOTAL, &[]), 2);
        assert_eq!(metrics.counter(CACHE_MISSES_TOTAL, &[]), 1);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(PromptCache::new(16, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let params = p(&format!("{t}-{i}"));
                        cache.set("t", &params, format!("v{t}-{i}"), None);
                        if let Some(v) = cache.get("t", &params) {
                            assert_eq!(v, format!("v{t}-{i}"));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 16);
    }

    proptest! {
        #[test]
        fn prop_size_never_exceeds_capacity(
            capacity in 1usize..8,
            ops in proptest::collection::vec((0u8..20, any::<bool>()), 0..100)
        ) {
            let (cache, clock) = cache_with_clock(capacity, 3600);
            for (key, read) in ops {
                let params = p(&key.to_string());
                if read {
                    let _ = cache.get("t", &params);
                } else {
                    cache.set("t", &params, key.to_string(), None);
                }
                clock.advance(Duration::from_millis(10));
                prop_assert!(cache.len() <= capacity);
            }
        }

        #[test]
        fn prop_set_then_get_returns_value(name in "[a-z]{0,12}", value in ".{0,40}") {
            let (cache, _) = cache_with_clock(4, 60);
            cache.set("t", &p(&name), value.clone(), None);
            prop_assert_eq!(cache.get("t", &p(&name)), Some(value));
        }
    }
}
