//! A single ordered-map partition.
//!
//! One `BTreeMap` guarded by one `parking_lot::Mutex`, plus atomic counters
//! and bounds so statistics collection and range pruning stay lock-free on
//! the read side.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use shardkv_core::ShardKey;

/// Point-in-time snapshot of a partition's counters and bounds.
///
/// Read without locking the partition; may be stale by the time the caller
/// observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartitionStats<K> {
    /// Number of live mappings.
    pub size: usize,
    /// Monotonic count of `insert` calls (including replacements).
    pub inserts: u64,
    /// Monotonic count of successful `remove` calls.
    pub removes: u64,
    /// Monotonic count of `get`/`contains` calls.
    pub lookups: u64,
    /// Least and greatest live key, or `None` if the partition is empty.
    pub bounds: Option<(K, K)>,
}

/// One partition: an ordered map plus its statistics.
pub struct Partition<K: ShardKey, V> {
    map: Mutex<BTreeMap<K, V>>,
    size: AtomicUsize,
    inserts: AtomicU64,
    removes: AtomicU64,
    lookups: AtomicU64,
    min_key: AtomicI64,
    max_key: AtomicI64,
    has_keys: AtomicBool,
}

impl<K: ShardKey, V> Partition<K, V> {
    /// Create an empty partition.
    pub fn new() -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
            inserts: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
            min_key: AtomicI64::new(0),
            max_key: AtomicI64::new(0),
            has_keys: AtomicBool::new(false),
        }
    }

    /// Number of live mappings. Lock-free.
    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Least/greatest live key, or `None` if empty. Lock-free.
    #[inline]
    pub fn bounds(&self) -> Option<(K, K)> {
        if !self.has_keys.load(Ordering::Acquire) {
            return None;
        }
        let lo = K::from_bound_repr(self.min_key.load(Ordering::Acquire));
        let hi = K::from_bound_repr(self.max_key.load(Ordering::Acquire));
        Some((lo, hi))
    }

    /// Conservative, lock-free intersection test against `[lo, hi]`.
    ///
    /// May return `true` with zero matches; never returns `false` when a
    /// match exists.
    #[inline]
    pub fn intersects(&self, lo: K, hi: K) -> bool {
        match self.bounds() {
            Some((min, max)) => lo <= max && hi >= min,
            None => false,
        }
    }

    fn tighten_on_insert(&self, k: K) {
        let bits = k.to_bound_repr();
        if self
            .has_keys
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.min_key.store(bits, Ordering::Release);
            self.max_key.store(bits, Ordering::Release);
            return;
        }
        self.min_key.fetch_min(bits, Ordering::AcqRel);
        self.max_key.fetch_max(bits, Ordering::AcqRel);
    }

    /// Insert or replace the mapping for `k`.
    ///
    /// If `k` already had a value, it is dropped after the partition mutex is
    /// released: value destructors should not run under the lock.
    pub fn insert(&self, k: K, v: V) {
        let old = {
            let mut map = self.map.lock();
            map.insert(k, v)
        };
        if old.is_none() {
            self.size.fetch_add(1, Ordering::AcqRel);
            self.tighten_on_insert(k);
        }
        self.inserts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(target: "shardkv::partition", op = "insert", "partition mutation");
        drop(old);
    }

    /// Remove the mapping for `k`, if present. Returns whether it existed.
    pub fn remove(&self, k: &K) -> bool {
        let (removed, new_bounds) = {
            let mut map = self.map.lock();
            let removed = map.remove(k);
            let new_bounds = if removed.is_some() {
                let first = map.keys().next().copied();
                let last = map.keys().next_back().copied();
                match (first, last) {
                    (Some(lo), Some(hi)) => Some(Some((lo, hi))),
                    _ => Some(None),
                }
            } else {
                None
            };
            (removed, new_bounds)
        };

        let existed = removed.is_some();
        if existed {
            self.size.fetch_sub(1, Ordering::AcqRel);
            self.removes.fetch_add(1, Ordering::Relaxed);
            match new_bounds.flatten() {
                Some((lo, hi)) => {
                    self.min_key.store(lo.to_bound_repr(), Ordering::Release);
                    self.max_key.store(hi.to_bound_repr(), Ordering::Release);
                    self.has_keys.store(true, Ordering::Release);
                }
                None => {
                    self.has_keys.store(false, Ordering::Release);
                }
            }
            tracing::trace!(target: "shardkv::partition", op = "remove", "partition mutation");
        }
        drop(removed);
        existed
    }

    /// Whether `k` is present.
    pub fn contains(&self, k: &K) -> bool {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let map = self.map.lock();
        map.contains_key(k)
    }

    /// The value for `k`, cloned out from under the partition mutex.
    pub fn get(&self, k: &K) -> Option<V>
    where
        V: Clone,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let map = self.map.lock();
        map.get(k).cloned()
    }

    /// Emit every `(k, v)` with `lo <= k <= hi` in ascending key order into
    /// `sink`. `sink` returns `false` to stop early (saturation).
    pub fn range<F>(&self, lo: K, hi: K, mut sink: F)
    where
        V: Clone,
        F: FnMut(K, V) -> bool,
    {
        if lo > hi {
            return;
        }
        let map = self.map.lock();
        for (k, v) in map.range(lo..=hi) {
            if !sink(*k, v.clone()) {
                break;
            }
        }
    }

    /// Remove and return every mapping, in ascending key order, emptying the
    /// partition and resetting its counters and bounds.
    pub fn extract_all(&self) -> Vec<(K, V)> {
        let mut map = self.map.lock();
        let drained: Vec<(K, V)> = std::mem::take(&mut *map).into_iter().collect();
        drop(map);
        self.size.store(0, Ordering::Release);
        self.has_keys.store(false, Ordering::Release);
        drained
    }

    /// Remove every mapping and reset counters and bounds.
    pub fn clear(&self) {
        let mut map = self.map.lock();
        map.clear();
        drop(map);
        self.size.store(0, Ordering::Release);
        self.inserts.store(0, Ordering::Release);
        self.removes.store(0, Ordering::Release);
        self.lookups.store(0, Ordering::Release);
        self.has_keys.store(false, Ordering::Release);
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> PartitionStats<K> {
        PartitionStats {
            size: self.size(),
            inserts: self.inserts.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            bounds: self.bounds(),
        }
    }
}

impl<K: ShardKey, V> Default for Partition<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
