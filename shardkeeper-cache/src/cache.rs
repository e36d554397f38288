//! The hybrid LRU+LFU cache itself (spec §4.2).
//!
//! A single `parking_lot::Mutex` protects the map and the eviction heap together;
//! critical sections are the O(log C) heap push/pop plus an O(1) map lookup, never a
//! disk operation — long I/O happens either synchronously before the mutex is taken
//! (`PutChunk`'s fsync+rename) or on the writeback worker's own task (read-miss
//! admission), matching spec §5's "no core operation holds a lock across a suspension".

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use shardkeeper_core::{MetricsRegistry, ShardId};

use crate::scoring::score;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoreKey(f64);

impl Eq for ScoreKey {}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

/// A heap entry carrying the score version it was computed against. On pop, a stale
/// version is discarded and the heap is popped again rather than trusted (spec §9:
/// "heap with lazy invalidation").
#[derive(Debug, Eq, PartialEq)]
struct HeapItem {
    score: ScoreKey,
    version: u64,
    shard_id: ShardId,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.cmp(&other.score)
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Entry {
    bytes: Arc<[u8]>,
    freq: u64,
    last_access: Instant,
    pin_count: u32,
    version: u64,
}

struct Inner {
    entries: HashMap<ShardId, Entry>,
    heap: BinaryHeap<std::cmp::Reverse<HeapItem>>,
    f_max: u64,
    capacity: usize,
}

impl Inner {
    fn current_score(&self, entry: &Entry) -> f64 {
        score(entry.freq, self.f_max, entry.last_access.elapsed())
    }

    fn push_heap(&mut self, shard_id: ShardId, entry: &Entry) {
        self.heap.push(std::cmp::Reverse(HeapItem {
            score: ScoreKey(self.current_score(entry)),
            version: entry.version,
            shard_id,
        }));
    }

    /// Pop the lowest-scoring, unpinned, non-stale entry. Stale or pinned heap items
    /// are discarded (and, for pinned ones, not re-pushed — the live entry is still
    /// indexed and will get a fresh heap item next time its score changes).
    fn evict_one(&mut self) -> Option<ShardId> {
        while let Some(std::cmp::Reverse(item)) = self.heap.pop() {
            let Some(entry) = self.entries.get(&item.shard_id) else {
                continue;
            };
            if entry.version != item.version {
                continue;
            }
            if entry.pin_count > 0 {
                continue;
            }
            self.entries.remove(&item.shard_id);
            return Some(item.shard_id);
        }
        None
    }
}

/// Outcome of a cache-admitting insert, used by callers to decide whether to log an
/// eviction.
pub struct AdmitResult {
    pub evicted: Option<ShardId>,
    /// `false` when the cache was at capacity and every existing entry was pinned, so
    /// no eviction candidate existed — the new entry is refused rather than grown past
    /// `capacity` (spec §4.2: "cache size never exceeds C").
    pub admitted: bool,
}

/// An RAII guard keeping an entry pinned (exempt from eviction) for the duration of an
/// in-flight read (spec §4.2: "Eviction never selects a pinned entry").
pub struct PinGuard {
    cache: Arc<HybridCache>,
    shard_id: ShardId,
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.cache.unpin(self.shard_id);
    }
}

pub struct HybridCache {
    inner: Mutex<Inner>,
    metrics: Arc<MetricsRegistry>,
    next_version: AtomicU64,
}

impl HybridCache {
    pub fn new(capacity: usize, metrics: Arc<MetricsRegistry>) -> Self {
        metrics.cache_capacity.set(capacity as f64);
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                heap: BinaryHeap::with_capacity(capacity),
                f_max: 0,
                capacity,
            }),
            metrics,
            next_version: AtomicU64::new(1),
        }
    }

    fn fresh_version(&self) -> u64 {
        self.next_version.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Read-through lookup: bumps frequency/recency on hit, records hit/miss metrics.
    pub fn get(&self, shard_id: ShardId) -> Option<Arc<[u8]>> {
        let mut guard = self.inner.lock();
        let version = self.fresh_version();

        let (bytes, freq, last_access) = {
            let entry = match guard.entries.get_mut(&shard_id) {
                Some(entry) => entry,
                None => {
                    self.metrics.cache_misses_total.inc();
                    return None;
                }
            };
            entry.freq += 1;
            entry.last_access = Instant::now();
            entry.version = version;
            (entry.bytes.clone(), entry.freq, entry.last_access)
        };

        if freq > guard.f_max {
            guard.f_max = freq;
        }
        let s = score(freq, guard.f_max, last_access.elapsed());
        guard.heap.push(std::cmp::Reverse(HeapItem {
            score: ScoreKey(s),
            version,
            shard_id,
        }));
        self.metrics.cache_hits_total.inc();
        Some(bytes)
    }

    /// Insert or overwrite an entry, evicting the lowest-scoring unpinned entry first
    /// if the cache is at capacity (spec §4.2). Used directly by the synchronous
    /// `PutChunk` path and by the writeback worker for async admission alike.
    pub fn admit(&self, shard_id: ShardId, bytes: Arc<[u8]>) -> AdmitResult {
        let mut guard = self.inner.lock();
        let mut evicted = None;
        let is_new_key = !guard.entries.contains_key(&shard_id);

        if is_new_key && guard.entries.len() >= guard.capacity {
            evicted = guard.evict_one();
            if evicted.is_some() {
                self.metrics.cache_evictions_total.inc();
            } else {
                // Every existing entry is pinned: no room was freed. Refuse the new
                // entry rather than let the map grow past `capacity`.
                self.metrics.cache_size.set(guard.entries.len() as f64);
                return AdmitResult { evicted: None, admitted: false };
            }
        }

        let version = self.fresh_version();
        let entry = Entry {
            bytes,
            freq: 1,
            last_access: Instant::now(),
            pin_count: 0,
            version,
        };
        if entry.freq > guard.f_max {
            guard.f_max = entry.freq;
        }
        guard.push_heap(shard_id, &entry);
        guard.entries.insert(shard_id, entry);
        self.metrics.cache_size.set(guard.entries.len() as f64);

        AdmitResult { evicted, admitted: true }
    }

    pub fn remove(&self, shard_id: ShardId) {
        let mut guard = self.inner.lock();
        guard.entries.remove(&shard_id);
        self.metrics.cache_size.set(guard.entries.len() as f64);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn contains(&self, shard_id: ShardId) -> bool {
        self.inner.lock().entries.contains_key(&shard_id)
    }

    fn unpin(&self, shard_id: ShardId) {
        let mut guard = self.inner.lock();
        if let Some(entry) = guard.entries.get_mut(&shard_id) {
            entry.pin_count = entry.pin_count.saturating_sub(1);
        }
    }

    /// Pin an already-cached entry for the duration of an in-flight read. Returns
    /// `None` if the shard is not currently cached (callers fall back to disk).
    pub fn pin(self: &Arc<Self>, shard_id: ShardId) -> Option<PinGuard> {
        let mut guard = self.inner.lock();
        let entry = guard.entries.get_mut(&shard_id)?;
        entry.pin_count += 1;
        Some(PinGuard {
            cache: self.clone(),
            shard_id,
        })
    }

    /// Halve every frequency counter and `F_max`, per spec §9's optional epoch reset.
    pub fn halve_frequencies(&self) {
        let mut guard = self.inner.lock();
        for entry in guard.entries.values_mut() {
            entry.freq = (entry.freq / 2).max(1);
        }
        guard.f_max = (guard.f_max / 2).max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> Arc<HybridCache> {
        Arc::new(HybridCache::new(capacity, Arc::new(MetricsRegistry::new().unwrap())))
    }

    #[test]
    fn admit_never_exceeds_capacity() {
        let c = cache(3);
        for i in 0..10u64 {
            c.admit(ShardId(i), Arc::from(vec![0u8; 4]));
            assert!(c.len() <= 3);
        }
    }

    #[test]
    fn hit_increments_frequency_and_affects_future_eviction() {
        let c = cache(2);
        c.admit(ShardId(1), Arc::from(vec![1u8]));
        c.admit(ShardId(2), Arc::from(vec![2u8]));
        // Access shard 1 repeatedly so its frequency dominates shard 2's.
        for _ in 0..50 {
            c.get(ShardId(1));
        }
        c.admit(ShardId(3), Arc::from(vec![3u8]));
        assert!(c.contains(ShardId(1)));
        assert!(!c.contains(ShardId(2)));
    }

    #[test]
    fn pinned_entry_survives_eviction_pressure() {
        let c = cache(1);
        c.admit(ShardId(1), Arc::from(vec![1u8]));
        let _guard = c.pin(ShardId(1)).unwrap();
        let result = c.admit(ShardId(2), Arc::from(vec![2u8]));
        // Capacity 1, shard 1 pinned: shard 2 is refused, cache size never exceeds capacity.
        assert!(!result.admitted);
        assert!(c.contains(ShardId(1)));
        assert!(!c.contains(ShardId(2)));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn empty_cache_f_max_zero_scores_without_nan() {
        let c = cache(4);
        let result = c.admit(ShardId(1), Arc::from(vec![1u8]));
        assert!(result.evicted.is_none());
        assert!(c.contains(ShardId(1)));
    }
}
