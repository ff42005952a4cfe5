//! Bounded in-memory cache of processed results
//!
//! Maps an input [`Fingerprint`] to the encoded output produced for it so that
//! repeated uploads of the same bytes skip the engine entirely. The cache is
//! process-local and never persisted. Capacity is enforced on every insert by
//! evicting the least-recently-used entry; an optional time-to-live expires
//! entries lazily on lookup.
//!
//! Failures inside the cache never fail a request: a lock poisoned by a
//! panicking thread is recovered by dropping every entry, and the cache keeps
//! serving from an empty state.

use crate::config::OutputFormat;
use crate::fingerprint::Fingerprint;
use instant::{Duration, Instant};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Encoded output stored in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedOutput {
    /// Encoded image bytes
    pub data: Arc<[u8]>,
    /// Encoding of `data`
    pub format: OutputFormat,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
}

impl CachedOutput {
    #[must_use]
    pub fn new(data: Vec<u8>, format: OutputFormat, width: u32, height: u32) -> Self {
        Self {
            data: Arc::from(data),
            format,
            width,
            height,
        }
    }

    /// Size of the encoded bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently held
    pub entries: usize,
    /// Configured maximum entries
    pub capacity: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing (or an expired entry)
    pub misses: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Total encoded bytes held
    pub total_bytes: u64,
}

#[derive(Debug)]
struct Slot {
    output: CachedOutput,
    tick: u64,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<Fingerprint, Slot>,
    /// Recency index: ascending tick order, first = least recently used
    recency: BTreeMap<u64, Fingerprint>,
    next_tick: u64,
    stats: CacheStats,
}

impl CacheInner {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &Fingerprint) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        self.stats.total_bytes = self
            .stats
            .total_bytes
            .saturating_sub(slot.output.len() as u64);
        Some(slot)
    }

    fn evict_lru(&mut self) -> Option<Fingerprint> {
        let (_, key) = self.recency.pop_first()?;
        if let Some(slot) = self.entries.remove(&key) {
            self.stats.total_bytes = self
                .stats
                .total_bytes
                .saturating_sub(slot.output.len() as u64);
        }
        self.stats.evictions += 1;
        Some(key)
    }
}

/// Thread-safe LRU result cache
#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    ttl: Option<Duration>,
    inner: Mutex<CacheInner>,
}

impl ResultCache {
    /// Create a cache holding at most `capacity` entries
    ///
    /// A capacity of zero disables caching: every lookup misses and inserts
    /// are dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ttl: None,
            inner: Mutex::new(CacheInner {
                stats: CacheStats {
                    capacity,
                    ..CacheStats::default()
                },
                ..CacheInner::default()
            }),
        }
    }

    /// Expire entries `ttl` after insertion
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Configured maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lock the cache state, recovering from poisoning
    ///
    /// A panic mid-update may leave the entry map and recency index out of
    /// step, so a recovered cache starts over empty. Counters are kept.
    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("result cache lock poisoned; dropping cached entries");
            self.inner.clear_poison();
            let mut inner = poisoned.into_inner();
            inner.entries.clear();
            inner.recency.clear();
            inner.stats.total_bytes = 0;
            inner
        })
    }

    fn is_expired(&self, slot: &Slot, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(slot.inserted_at) >= ttl)
    }

    /// Look up a fingerprint, marking the entry most recently used
    pub fn get(&self, key: &Fingerprint) -> Option<CachedOutput> {
        let mut inner = self.lock();
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            None => {
                inner.stats.misses += 1;
                return None;
            },
            Some(slot) => self.is_expired(slot, now),
        };

        if expired {
            inner.remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            tracing::debug!(fingerprint = %key.short(), "cache entry expired");
            return None;
        }

        let tick = inner.bump();
        let inner = &mut *inner;
        let slot = inner.entries.get_mut(key)?;
        inner.recency.remove(&slot.tick);
        inner.recency.insert(tick, key.clone());
        slot.tick = tick;
        let output = slot.output.clone();
        inner.stats.hits += 1;
        Some(output)
    }

    /// Insert or replace the output for a fingerprint
    ///
    /// When the cache is full the least-recently-used entry is evicted first,
    /// so the number of entries never exceeds the capacity.
    pub fn put(&self, key: Fingerprint, output: CachedOutput) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.lock();
        inner.remove(&key);
        while inner.entries.len() >= self.capacity {
            match inner.evict_lru() {
                Some(evicted) => {
                    tracing::debug!(fingerprint = %evicted.short(), "evicted least recently used result");
                },
                None => break,
            }
        }

        let tick = inner.bump();
        inner.stats.total_bytes += output.len() as u64;
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Slot {
                output,
                tick,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Whether a live entry exists, without touching recency or statistics
    pub fn contains(&self, key: &Fingerprint) -> bool {
        let inner = self.lock();
        let now = Instant::now();
        inner
            .entries
            .get(key)
            .is_some_and(|slot| !self.is_expired(slot, now))
    }

    /// Number of entries held (expired entries count until looked up or purged)
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fingerprints from least to most recently used
    pub fn keys_by_recency(&self) -> Vec<Fingerprint> {
        self.lock().recency.values().cloned().collect()
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let mut inner = self.lock();
        let now = Instant::now();
        let expired: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, slot)| self.is_expired(slot, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.stats.expirations += expired.len() as u64;
        expired.len()
    }

    /// Drop all entries, keeping the counters
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.stats.total_bytes = 0;
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats.clone()
        }
    }

    /// Cache hit ratio as a percentage
    pub fn hit_ratio(&self) -> f64 {
        let stats = self.stats();
        let total = stats.hits + stats.misses;
        if total == 0 {
            0.0
        } else {
            (stats.hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(name: &str) -> Fingerprint {
        Fingerprint::of(name.as_bytes())
    }

    fn output(len: usize) -> CachedOutput {
        CachedOutput::new(vec![7; len], OutputFormat::Png, 1, 1)
    }

    #[test]
    fn test_get_returns_inserted_output() {
        let cache = ResultCache::new(4);
        cache.put(key("a"), output(3));

        let hit = cache.get(&key("a")).expect("entry should be cached");
        assert_eq!(hit.len(), 3);
        assert!(cache.get(&key("missing")).is_none());
    }

    #[test]
    fn test_three_puts_into_capacity_two_evicts_oldest() {
        let cache = ResultCache::new(2);
        cache.put(key("A"), output(1));
        cache.put(key("B"), output(1));
        cache.put(key("C"), output(1));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key("B")));
        assert!(cache.contains(&key("C")));
        assert!(cache.get(&key("A")).is_none());
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = ResultCache::new(2);
        cache.put(key("A"), output(1));
        cache.put(key("B"), output(1));

        // A becomes most recently used, so B is the eviction victim
        assert!(cache.get(&key("A")).is_some());
        cache.put(key("C"), output(1));

        assert!(cache.contains(&key("A")));
        assert!(!cache.contains(&key("B")));
        assert_eq!(cache.keys_by_recency(), vec![key("A"), key("C")]);
    }

    #[test]
    fn test_capacity_never_exceeded_and_victim_is_lru() {
        let capacity = 5;
        let cache = ResultCache::new(capacity);
        let mut model: Vec<Fingerprint> = Vec::new();

        for i in 0..50 {
            // Touch an older key every third step to shuffle recency
            if i % 3 == 0 && model.len() > 1 {
                let touched = model.remove(0);
                assert!(cache.get(&touched).is_some());
                model.push(touched);
            }

            let k = key(&format!("img-{i}"));
            if model.len() == capacity {
                let expected_victim = model.remove(0);
                cache.put(k.clone(), output(1));
                assert!(!cache.contains(&expected_victim));
            } else {
                cache.put(k.clone(), output(1));
            }
            model.push(k);

            assert!(cache.len() <= capacity);
            assert_eq!(cache.keys_by_recency(), model);
        }
    }

    #[test]
    fn test_replacing_a_key_keeps_a_single_entry() {
        let cache = ResultCache::new(2);
        cache.put(key("A"), output(1));
        cache.put(key("A"), output(9));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("A")).unwrap().len(), 9);
        assert_eq!(cache.stats().total_bytes, 9);
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let cache = ResultCache::new(0);
        cache.put(key("A"), output(1));
        assert!(cache.is_empty());
        assert!(cache.get(&key("A")).is_none());
    }

    #[test]
    fn test_ttl_expires_entries() {
        let cache = ResultCache::new(4).with_ttl(Some(Duration::from_millis(20)));
        cache.put(key("A"), output(1));
        assert!(cache.contains(&key("A")));

        thread::sleep(std::time::Duration::from_millis(40));

        assert!(!cache.contains(&key("A")));
        assert!(cache.get(&key("A")).is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = ResultCache::new(4).with_ttl(Some(Duration::from_millis(10)));
        cache.put(key("A"), output(1));
        cache.put(key("B"), output(1));
        thread::sleep(std::time::Duration::from_millis(25));
        cache.put(key("C"), output(1));

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key("C")));
    }

    #[test]
    fn test_statistics_and_hit_ratio() {
        let cache = ResultCache::new(1);
        assert_eq!(cache.hit_ratio(), 0.0);

        cache.put(key("A"), output(4));
        cache.get(&key("A"));
        cache.get(&key("B"));
        cache.put(key("B"), output(2));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.capacity, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.total_bytes, 2);
        assert_eq!(cache.hit_ratio(), 50.0);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().total_bytes, 0);
    }

    #[test]
    fn test_poisoned_lock_recovers_empty() {
        let cache = Arc::new(ResultCache::new(4));
        cache.put(key("a"), output(3));

        let poisoner = Arc::clone(&cache);
        let joined = thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("panic while holding the cache lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(cache.inner.is_poisoned());

        assert!(cache.get(&key("a")).is_none());
        assert!(!cache.inner.is_poisoned());
        assert_eq!(cache.stats().total_bytes, 0);

        cache.put(key("b"), output(2));
        assert_eq!(cache.get(&key("b")), Some(output(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_access_respects_capacity() {
        let cache = Arc::new(ResultCache::new(8));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        let k = key(&format!("{}-{}", t, i % 16));
                        cache.put(k.clone(), output(1));
                        let _ = cache.get(&k);
                        assert!(cache.len() <= 8);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.entries <= 8);
        assert_eq!(stats.total_bytes, stats.entries as u64);
        assert_eq!(cache.keys_by_recency().len(), stats.entries);
    }
}
