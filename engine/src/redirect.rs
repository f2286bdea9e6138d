//! The redirect index: the auxiliary map that preserves single-map
//! linearizability when a write is steered to a non-natural partition.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use shardkv_core::ShardKey;

/// Point-in-time statistics for the redirect index.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RedirectStats {
    /// Number of live redirect entries.
    pub entries: usize,
    /// Cumulative lookup calls.
    pub lookups: u64,
    /// Cumulative lookups that found an entry.
    pub hits: u64,
    /// `hits / lookups`, or `0.0` if there have been no lookups.
    pub hit_rate: f64,
}

/// `K -> partition_id` for keys not resident in their natural partition.
///
/// Readers dominate writes in the expected workload (most lookups hit the
/// natural partition and never reach this index), so the backing map is
/// behind a reader-writer lock rather than a mutex.
pub struct RedirectIndex<K: ShardKey> {
    map: RwLock<FxHashMap<K, usize>>,
    lookups: AtomicU64,
    hits: AtomicU64,
}

impl<K: ShardKey> RedirectIndex<K> {
    /// An empty redirect index.
    pub fn new() -> Self {
        Self {
            map: RwLock::new(FxHashMap::default()),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Record that `key` was placed in `actual` instead of `natural`.
    ///
    /// A no-op when `natural == actual`: a redirect entry always implies
    /// non-natural placement.
    pub fn record(&self, key: K, natural: usize, actual: usize) {
        if natural == actual {
            return;
        }
        self.map.write().insert(key, actual);
    }

    /// The partition `key` was redirected to, if any.
    pub fn lookup(&self, key: &K) -> Option<usize> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let found = self.map.read().get(key).copied();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Remove the entry for `key`, if present. Called on every successful
    /// key removal so the index never outlives the key it describes.
    pub fn remove(&self, key: &K) {
        self.map.write().remove(key);
    }

    /// Drop every entry (used by `rebalance`, which forces `STATIC_HASH` and
    /// thus guarantees no redirects remain valid).
    pub fn clear(&self) {
        self.map.write().clear();
    }

    /// Remove every entry `keep` judges no longer a valid redirect.
    ///
    /// `keep(k, p)` receives the recorded destination `p` and decides
    /// whether it is still meaningful under the current topology. Two
    /// situations make an entry stale: the topology changed such that
    /// `k`'s natural partition under the new `N` now already equals `p`
    /// (the redirect is redundant — `get` would find it via the fast path
    /// anyway), or `p` no longer names a live partition at all (the
    /// partition was dropped out from under it). Callers building the
    /// predicate for a `drop_partition` must reject out-of-range `p` as well
    /// as redundant `p`, since a plain "does this key still redirect here"
    /// equality check can never fire for a partition id that no longer
    /// exists. Returns the number of entries removed.
    pub fn gc<F>(&self, keep: F) -> usize
    where
        F: Fn(&K, usize) -> bool,
    {
        let mut map = self.map.write();
        let before = map.len();
        map.retain(|k, p| keep(k, *p));
        let removed = before - map.len();
        drop(map);
        if removed > 0 {
            tracing::info!(target: "shardkv::redirect", removed, "redirect-index gc");
        }
        removed
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> RedirectStats {
        let entries = self.map.read().len();
        let lookups = self.lookups.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        RedirectStats { entries, lookups, hits, hit_rate }
    }
}

impl<K: ShardKey> Default for RedirectIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}
