//! The coordinator: the top-level store type. Owns the partition array, the
//! router, and the redirect index; implements the public operations and the
//! dynamic reconfiguration operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use shardkv_core::{Error, Result, ShardKey};

use crate::fingerprint::natural_partition;
use crate::partition::Partition;
use crate::redirect::RedirectIndex;
use crate::router::{Router, Strategy};
use crate::stats::StoreStats;

/// Construction-time configuration for a [`Coordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoreConfig {
    /// Number of partitions the store starts with. Must be at least 1.
    pub initial_partitions: usize,
    /// Routing strategy used until the first reconfiguration (reconfiguration
    /// rebuilds the router for the new partition count but keeps the
    /// strategy; `rebalance` is the one operation that forces `StaticHash`).
    pub strategy: Strategy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { initial_partitions: 8, strategy: Strategy::default() }
    }
}

/// The partition array and the router that was built for its current length,
/// updated together so that no reader can ever observe one without the other.
///
/// Keeping these as two independently-locked fields (as an earlier revision
/// did) let a `drop_partition` that shrank the array first and swapped the
/// router second be observed mid-update by a concurrent `put`: the reader
/// would see the *new, smaller* partition count paired with the *old*
/// router, which still computes destinations modulo the old, larger `N` —
/// an out-of-bounds index into the shrunk array. Bundling both fields behind
/// one `RwLock` makes that intermediate state unobservable: every read sees
/// either the pre- or the post-reconfiguration pairing, never a mix.
struct Topology<K: ShardKey, V> {
    partitions: Vec<Arc<Partition<K, V>>>,
    router: Arc<Router<K>>,
}

/// The sharded, ordered key-value store.
///
/// Cloning a `Coordinator` is not supported directly — share it behind an
/// `Arc` the way a host process shares any other long-lived engine handle.
pub struct Coordinator<K: ShardKey, V> {
    topology: RwLock<Topology<K, V>>,
    redirects: RedirectIndex<K>,
    /// Write-once-per-lifetime (except `rebalance`, which clears it): set the
    /// first time a key is placed outside its natural partition.
    has_redirects: AtomicBool,
    /// Write-once-per-lifetime (except `rebalance`, which clears it): set by
    /// the first topology change (`add_partition`/`drop_partition`).
    topology_changed: AtomicBool,
    /// Serializes `add_partition`/`drop_partition`/`rebalance` against each
    /// other. Read-path operations never take this lock.
    reconfig: Mutex<()>,
}

impl<K: ShardKey, V: Clone + Send + Sync + 'static> Coordinator<K, V> {
    /// Construct a store with `config.initial_partitions` partitions.
    ///
    /// # Panics
    /// Panics if `config.initial_partitions == 0`.
    pub fn new(config: StoreConfig) -> Self {
        assert!(config.initial_partitions > 0, "a store needs at least one partition");
        let partitions = (0..config.initial_partitions)
            .map(|_| Arc::new(Partition::new()))
            .collect();
        let router = Arc::new(Router::new(config.initial_partitions, config.strategy));
        Self {
            topology: RwLock::new(Topology { partitions, router }),
            redirects: RedirectIndex::new(),
            has_redirects: AtomicBool::new(false),
            topology_changed: AtomicBool::new(false),
            reconfig: Mutex::new(()),
        }
    }

    /// Current partition count.
    pub fn partition_count(&self) -> usize {
        self.topology.read().partitions.len()
    }

    /// Whether any key has ever been placed outside its natural partition.
    /// Cleared only by [`Coordinator::rebalance`].
    pub fn has_redirects(&self) -> bool {
        self.has_redirects.load(Ordering::Acquire)
    }

    /// Whether the topology has changed since construction (an
    /// `add_partition` or `drop_partition` has occurred). Cleared only by
    /// [`Coordinator::rebalance`].
    pub fn topology_changed(&self) -> bool {
        self.topology_changed.load(Ordering::Acquire)
    }

    /// Insert or replace the mapping for `k`.
    ///
    /// The router is free to route the same key differently on successive
    /// calls (its adversary-resistance throttling can flip a redirect
    /// decision between "allowed" and "blocked" from one call to the next).
    /// To keep each key mapped from exactly one partition intact across such
    /// a flip, `put` first finds where `k` currently lives — via the
    /// redirect index, or its natural partition — and relocates it before
    /// writing the new destination, rather than trusting that a freshly
    /// computed route always agrees with the key's last placement.
    pub fn put(&self, k: K, v: V) {
        let topology = self.topology.read();
        let partitions = &topology.partitions;
        let router = &topology.router;
        let n = partitions.len();
        let natural = natural_partition(&k, n);
        let dest = router.route(&k);

        let existing_redirect =
            if self.has_redirects.load(Ordering::Acquire) { self.redirects.lookup(&k) } else { None };

        match existing_redirect {
            Some(old_p) if old_p != dest && old_p < n => {
                if partitions[old_p].remove(&k) {
                    router.record_removal(old_p);
                }
                self.redirects.remove(&k);
            }
            None if natural != dest && partitions[natural].contains(&k) => {
                if partitions[natural].remove(&k) {
                    router.record_removal(natural);
                }
            }
            _ => {}
        }

        let size_before = partitions[dest].size();
        partitions[dest].insert(k, v);
        let size_after = partitions[dest].size();

        if size_after > size_before {
            router.record_insertion(dest);
        }
        if dest != natural {
            self.redirects.record(k, natural, dest);
            self.has_redirects.store(true, Ordering::Release);
        } else {
            self.redirects.remove(&k);
        }
    }

    /// The value for `k`, if present.
    pub fn get(&self, k: &K) -> Option<V> {
        let topology = self.topology.read();
        let partitions = &topology.partitions;
        let n = partitions.len();
        let natural = natural_partition(k, n);

        if let Some(v) = partitions[natural].get(k) {
            return Some(v);
        }
        if self.has_redirects.load(Ordering::Acquire) {
            if let Some(p) = self.redirects.lookup(k) {
                if p < n && p != natural {
                    if let Some(v) = partitions[p].get(k) {
                        return Some(v);
                    }
                }
            }
        }
        if self.topology_changed.load(Ordering::Acquire) {
            for (i, part) in partitions.iter().enumerate() {
                if i == natural {
                    continue;
                }
                if let Some(v) = part.get(k) {
                    return Some(v);
                }
            }
        }
        None
    }

    /// Whether `k` is present.
    pub fn contains(&self, k: &K) -> bool {
        let topology = self.topology.read();
        let partitions = &topology.partitions;
        let n = partitions.len();
        let natural = natural_partition(k, n);

        if partitions[natural].contains(k) {
            return true;
        }
        if self.has_redirects.load(Ordering::Acquire) {
            if let Some(p) = self.redirects.lookup(k) {
                if p < n && p != natural && partitions[p].contains(k) {
                    return true;
                }
            }
        }
        if self.topology_changed.load(Ordering::Acquire) {
            for (i, part) in partitions.iter().enumerate() {
                if i == natural {
                    continue;
                }
                if part.contains(k) {
                    return true;
                }
            }
        }
        false
    }

    /// Remove the mapping for `k`. Returns whether it existed.
    pub fn remove(&self, k: &K) -> bool {
        let topology = self.topology.read();
        let partitions = &topology.partitions;
        let router = &topology.router;
        let n = partitions.len();
        let natural = natural_partition(k, n);

        if partitions[natural].remove(k) {
            router.record_removal(natural);
            self.redirects.remove(k);
            return true;
        }
        if let Some(p) = self.redirects.lookup(k) {
            if p < n && p != natural && partitions[p].remove(k) {
                router.record_removal(p);
                self.redirects.remove(k);
                return true;
            }
        }
        if self.topology_changed.load(Ordering::Acquire) {
            for (i, part) in partitions.iter().enumerate() {
                if i == natural {
                    continue;
                }
                if part.remove(k) {
                    router.record_removal(i);
                    self.redirects.remove(k);
                    return true;
                }
            }
        }
        false
    }

    /// Every `(k, v)` with `lo <= k <= hi`, across all partitions, sorted
    /// ascending by key. `lo > hi` returns an empty result. This is a
    /// snapshot-inconsistent query: concurrent mutations during enumeration
    /// may or may not be observed.
    pub fn range(&self, lo: K, hi: K) -> Vec<(K, V)> {
        if lo > hi {
            return Vec::new();
        }
        let topology = self.topology.read();
        let mut out = Vec::new();
        for part in topology.partitions.iter() {
            if part.intersects(lo, hi) {
                part.range(lo, hi, |k, v| {
                    out.push((k, v));
                    true
                });
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Sum of live partition sizes. Lock-free, approximate under concurrent
    /// writers.
    pub fn size(&self) -> usize {
        self.topology.read().partitions.iter().map(|p| p.size()).sum()
    }

    /// Aggregate point-in-time statistics.
    pub fn stats(&self) -> StoreStats<K> {
        let topology = self.topology.read();
        let partition_stats: Vec<_> = topology.partitions.iter().map(|p| p.stats()).collect();
        let total_size = partition_stats.iter().map(|s| s.size).sum();
        let router = topology.router.stats();
        let redirects = self.redirects.stats();
        StoreStats { total_size, partitions: partition_stats, router, redirects }
    }

    /// Append a new, empty partition. Existing keys are not migrated — they
    /// stay where they are. Future `put`s may land on the new partition
    /// according to the rebuilt router.
    pub fn add_partition(&self) -> Result<()> {
        let _serialize = self.reconfig.lock();

        let new_n = {
            let mut topology = self.topology.write();
            topology.partitions.push(Arc::new(Partition::new()));
            let new_n = topology.partitions.len();
            let strategy = topology.router.strategy();
            let loads = topology.router.loads_snapshot();
            topology.router = Arc::new(Router::with_loads(new_n, strategy, loads));
            new_n
        };
        self.topology_changed.store(true, Ordering::Release);

        tracing::info!(target: "shardkv::coordinator", partitions = new_n, "add_partition");
        Ok(())
    }

    /// Remove the last partition (id `N-1`). Its keys are re-homed through
    /// the normal `put` path under the rebuilt router, and the redirect
    /// index is garbage-collected against the new topology.
    ///
    /// # Errors
    /// Returns [`Error::InvalidReconfiguration`] if `N == 1`; the store is
    /// left unchanged.
    pub fn drop_partition(&self) -> Result<()> {
        let _serialize = self.reconfig.lock();

        // Pop the last partition and swap in the router rebuilt for the
        // shrunk count in the same write-locked critical section: a reader
        // that only ever sees the array and the router together can never
        // observe the new, smaller partition count paired with the old
        // router (which would route modulo the old, larger N and index past
        // the end of the array).
        let (last, new_n) = {
            let mut topology = self.topology.write();
            let n = topology.partitions.len();
            if n <= 1 {
                return Err(Error::InvalidReconfiguration);
            }
            let last = topology.partitions.pop().expect("checked n > 1 above");
            let new_n = n - 1;

            let strategy = topology.router.strategy();
            let mut loads = topology.router.loads_snapshot();
            loads.truncate(new_n);
            topology.router = Arc::new(Router::with_loads(new_n, strategy, loads));

            (last, new_n)
        };
        self.topology_changed.store(true, Ordering::Release);

        let extracted = last.extract_all();
        for (k, v) in extracted {
            self.put(k, v);
        }

        // A redirect entry is stale once its recorded destination either no
        // longer names a live partition, or now matches the key's natural
        // partition under the shrunk topology (redundant).
        self.redirects.gc(|k, p| p < new_n && natural_partition(k, new_n) != p);

        tracing::info!(target: "shardkv::coordinator", partitions = new_n, "drop_partition");
        Ok(())
    }

    /// Force a full rebalance: every key is extracted, the router is rebuilt
    /// as `STATIC_HASH`, and every key is reinserted at
    /// `fingerprint(k) mod N`. Clears the redirect index and both global
    /// flags. Idempotent: a second call observes the same keyset and layout.
    pub fn rebalance(&self) {
        let _serialize = self.reconfig.lock();

        let (extracted, n) = {
            let mut topology = self.topology.write();
            let n = topology.partitions.len();
            let mut extracted = Vec::new();
            for part in topology.partitions.iter() {
                extracted.extend(part.extract_all());
            }
            topology.router = Arc::new(Router::new(n, Strategy::StaticHash));
            (extracted, n)
        };

        self.redirects.clear();
        self.topology_changed.store(false, Ordering::Release);
        self.has_redirects.store(false, Ordering::Release);

        for (k, v) in extracted {
            self.put(k, v);
        }

        tracing::info!(target: "shardkv::coordinator", partitions = n, "rebalance");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(n: usize, strategy: Strategy) -> Coordinator<i64, i64> {
        Coordinator::new(StoreConfig { initial_partitions: n, strategy })
    }

    #[test]
    fn put_then_get_round_trips() {
        let c = store(4, Strategy::StaticHash);
        c.put(42, 100);
        assert!(c.contains(&42));
        assert_eq!(c.get(&42), Some(100));
    }

    #[test]
    fn put_twice_is_last_writer_wins_and_size_stable() {
        let c = store(4, Strategy::StaticHash);
        c.put(1, 10);
        c.put(1, 20);
        assert_eq!(c.get(&1), Some(20));
        assert_eq!(c.size(), 1);
    }

    #[test]
    fn remove_then_contains_is_false() {
        let c = store(4, Strategy::StaticHash);
        c.put(1, 10);
        assert!(c.remove(&1));
        assert!(!c.contains(&1));
        assert!(!c.remove(&1));
    }

    #[test]
    fn range_is_inclusive_both_ends_and_sorted() {
        let c = store(4, Strategy::StaticHash);
        for k in 0..100_i64 {
            c.put(k, k * 10);
        }
        let got = c.range(25, 75);
        assert_eq!(got.len(), 51);
        assert!(got.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(got.iter().all(|(k, v)| *v == k * 10));
    }

    #[test]
    fn range_lo_greater_than_hi_is_empty() {
        let c = store(4, Strategy::StaticHash);
        c.put(1, 1);
        assert!(c.range(5, 1).is_empty());
    }

    #[test]
    fn add_partition_preserves_existing_keys() {
        let c = store(2, Strategy::StaticHash);
        for k in 0..100_i64 {
            c.put(k, k);
        }
        c.add_partition().unwrap();
        assert_eq!(c.partition_count(), 3);
        for k in 0..100_i64 {
            assert!(c.contains(&k), "key {k} missing after add_partition");
        }
    }

    #[test]
    fn drop_partition_rejects_the_last_partition() {
        let c = store(1, Strategy::StaticHash);
        assert_eq!(c.drop_partition(), Err(Error::InvalidReconfiguration));
        assert_eq!(c.partition_count(), 1);
    }

    #[test]
    fn drop_partition_rehomes_keys() {
        let c = store(3, Strategy::StaticHash);
        for k in 0..150_i64 {
            c.put(k, k);
        }
        c.drop_partition().unwrap();
        assert_eq!(c.partition_count(), 2);
        for k in 0..150_i64 {
            assert!(c.contains(&k), "key {k} missing after drop_partition");
        }
        assert_eq!(c.size(), 150);
    }

    #[test]
    fn rebalance_is_idempotent_and_preserves_keyset() {
        let c = store(8, Strategy::Intelligent);
        for i in 0..100_i64 {
            c.put(8 * i, i);
        }
        c.rebalance();
        let after_first = c.range(i64::MIN, i64::MAX);
        c.rebalance();
        let after_second = c.range(i64::MIN, i64::MAX);
        assert_eq!(after_first, after_second);
        assert_eq!(c.stats().redirects.entries, 0);
    }

    #[test]
    fn rebalance_clears_redirects_and_relocates_to_natural_partition() {
        let c = store(8, Strategy::Intelligent);
        for i in 0..100_i64 {
            c.put(8 * i, i);
        }
        assert!(c.stats().redirects.entries > 0, "this workload should have triggered redirects");
        c.rebalance();
        assert_eq!(c.stats().redirects.entries, 0);
        for i in 0..100_i64 {
            let k = 8 * i;
            assert!(c.contains(&k));
        }
    }
}
