//! The routing layer: four selectable strategies, adversary resistance, and
//! the `INTELLIGENT` adaptive hybrid.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use shardkv_core::ShardKey;

use crate::fingerprint::{
    fingerprint, mix64, HISTORY_EVICTION_SECS, HOTSPOT_FACTOR, MAX_CACHE_INTERVAL,
    MAX_CONSECUTIVE_REDIRECTS, MIN_CACHE_INTERVAL, REDIRECT_COOLDOWN_MS, VNODES_PER_PARTITION,
};

/// The four selectable routing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Strategy {
    /// `route(k) = fingerprint(k) mod N`; no other state consulted.
    StaticHash,
    /// Redirect away from overloaded natural partitions toward the
    /// least-loaded one, subject to adversary-resistance throttling.
    LoadAware,
    /// A hash ring of `16 * N` virtual nodes.
    ConsistentHash,
    /// Adaptive hybrid, fast-path natural routing while healthy, otherwise
    /// defers to `LoadAware`. The default strategy.
    Intelligent,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Intelligent
    }
}

/// Snapshot of router-observed load and adversary-resistance statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouterStats {
    /// Sum of all per-partition load counters.
    pub total: u64,
    /// Minimum per-partition load.
    pub min: u64,
    /// Maximum per-partition load.
    pub max: u64,
    /// Mean per-partition load.
    pub mean: f64,
    /// `max(0, 1 - stddev/mean)`; 1.0 is perfectly balanced.
    pub balance_score: f64,
    /// Whether any partition exceeds `HOTSPOT_FACTOR * mean`.
    pub has_hotspot: bool,
    /// Count of keys classified suspicious (throttled past the limit).
    pub suspicious_patterns: u64,
    /// Count of redirects discarded by the throttle.
    pub blocked_redirects: u64,
}

struct ThrottleEntry {
    consecutive: u32,
    last: Instant,
}

struct AdaptiveState {
    balance: f64,
    hotspot: bool,
    ops_since_refresh: u64,
    interval: u64,
}

impl Default for AdaptiveState {
    fn default() -> Self {
        Self {
            balance: 1.0,
            hotspot: false,
            ops_since_refresh: 0,
            // Start conservatively: refresh soon rather than trusting an
            // unobserved "healthy" state for 500 ops.
            interval: MIN_CACHE_INTERVAL,
        }
    }
}

/// The router: chooses a destination partition per key under one strategy.
///
/// Immutable for its lifetime — reconfiguration builds a fresh `Router` via
/// [`Router::with_loads`] and swaps it in, rather than mutating `n` in place.
pub struct Router<K: ShardKey> {
    n: usize,
    strategy: Strategy,
    loads: Vec<AtomicU64>,
    /// Sorted `(virtual_hash, partition)` ring; only built for `ConsistentHash`.
    vnodes: Option<Vec<(u64, usize)>>,
    throttle: Mutex<FxHashMap<K, ThrottleEntry>>,
    recent_inserts: AtomicU64,
    suspicious_patterns: AtomicU64,
    blocked_redirects: AtomicU64,
    rng: Mutex<SmallRng>,
    adaptive: Mutex<AdaptiveState>,
}

impl<K: ShardKey> Router<K> {
    /// Build a fresh router for `n` partitions with zeroed load counters.
    pub fn new(n: usize, strategy: Strategy) -> Self {
        Self::with_loads(n, strategy, vec![0; n])
    }

    /// Build a router for `n` partitions, carrying forward prior load
    /// counters (used by `add_partition`/`drop_partition` so hotspot
    /// detection does not reset on a topology change). `loads` is resized to
    /// `n`, truncating or zero-extending as needed.
    pub fn with_loads(n: usize, strategy: Strategy, mut loads: Vec<u64>) -> Self {
        assert!(n > 0, "a router must serve at least one partition");
        loads.resize(n, 0);
        let vnodes = matches!(strategy, Strategy::ConsistentHash).then(|| build_vnodes(n));
        tracing::debug!(target: "shardkv::router", n, ?strategy, "router rebuilt");
        Self {
            n,
            strategy,
            loads: loads.into_iter().map(AtomicU64::new).collect(),
            vnodes,
            throttle: Mutex::new(FxHashMap::default()),
            recent_inserts: AtomicU64::new(0),
            suspicious_patterns: AtomicU64::new(0),
            blocked_redirects: AtomicU64::new(0),
            rng: Mutex::new(SmallRng::from_entropy()),
            adaptive: Mutex::new(AdaptiveState::default()),
        }
    }

    /// Number of partitions this router was built for.
    #[inline]
    pub fn partition_count(&self) -> usize {
        self.n
    }

    /// The configured strategy.
    #[inline]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Current per-partition load counters, for carrying forward into a
    /// rebuilt router.
    pub fn loads_snapshot(&self) -> Vec<u64> {
        self.loads.iter().map(|l| l.load(Ordering::Relaxed)).collect()
    }

    /// Choose a destination partition for `key`.
    pub fn route(&self, key: &K) -> usize {
        let natural = (fingerprint(key) % self.n as u64) as usize;
        match self.strategy {
            Strategy::StaticHash => natural,
            Strategy::LoadAware => self.route_load_aware(key, natural),
            Strategy::ConsistentHash => self.route_consistent_hash(key, natural),
            Strategy::Intelligent => self.route_intelligent(key, natural),
        }
    }

    /// Record that a key was newly inserted into partition `p`.
    pub fn record_insertion(&self, p: usize) {
        if p >= self.n {
            tracing::error!(target: "shardkv::router", p, n = self.n, "record_insertion: partition out of range");
            return;
        }
        self.loads[p].fetch_add(1, Ordering::Relaxed);
        let prev = self.recent_inserts.fetch_add(1, Ordering::Relaxed);
        if prev + 1 >= 50 * self.n as u64 {
            self.run_maintenance();
        }
    }

    /// Record that a key was removed from partition `p`. Saturates at zero.
    pub fn record_removal(&self, p: usize) {
        if p >= self.n {
            tracing::error!(target: "shardkv::router", p, n = self.n, "record_removal: partition out of range");
            return;
        }
        let _ = self.loads[p].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        });
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> RouterStats {
        let loads: Vec<u64> = self.loads.iter().map(|l| l.load(Ordering::Relaxed)).collect();
        let total: u64 = loads.iter().sum();
        let min = loads.iter().copied().min().unwrap_or(0);
        let max = loads.iter().copied().max().unwrap_or(0);
        let (balance_score, has_hotspot) = balance_and_hotspot(&loads);
        RouterStats {
            total,
            min,
            max,
            mean: mean_of(&loads),
            balance_score,
            has_hotspot,
            suspicious_patterns: self.suspicious_patterns.load(Ordering::Relaxed),
            blocked_redirects: self.blocked_redirects.load(Ordering::Relaxed),
        }
    }

    fn run_maintenance(&self) {
        let now = Instant::now();
        let cutoff = Duration::from_secs(HISTORY_EVICTION_SECS);
        let mut table = self.throttle.lock();
        let before = table.len();
        table.retain(|_, entry| now.duration_since(entry.last) < cutoff);
        let evicted = before - table.len();
        drop(table);
        self.recent_inserts.store(0, Ordering::Relaxed);
        tracing::debug!(target: "shardkv::router", evicted, "throttle-table maintenance");
    }

    fn route_load_aware(&self, key: &K, natural: usize) -> usize {
        let loads: Vec<u64> = self.loads.iter().map(|l| l.load(Ordering::Relaxed)).collect();
        let mean = mean_of(&loads);
        if mean <= 0.0 {
            return natural;
        }
        let natural_load = loads[natural] as f64;
        if natural_load < mean * HOTSPOT_FACTOR {
            return natural;
        }
        let (min_idx, min_load) = min_loaded(&loads);
        let candidate = if (min_load as f64) < mean {
            min_idx
        } else {
            self.random_partition()
        };
        if candidate == natural {
            natural
        } else {
            self.apply_throttle(key, natural, candidate)
        }
    }

    fn route_consistent_hash(&self, key: &K, natural: usize) -> usize {
        let vnodes = self
            .vnodes
            .as_ref()
            .expect("vnode ring must be built for ConsistentHash");
        let key_hash = fingerprint(key);
        let idx = vnodes.partition_point(|(h, _)| *h < key_hash);
        let idx = if idx == vnodes.len() { 0 } else { idx };
        let candidate = vnodes[idx].1;
        if candidate == natural {
            candidate
        } else {
            self.apply_throttle(key, natural, candidate)
        }
    }

    fn route_intelligent(&self, key: &K, natural: usize) -> usize {
        let (hotspot, balance, interval) = {
            let mut state = self.adaptive.lock();
            state.ops_since_refresh += 1;
            if state.ops_since_refresh >= state.interval {
                self.refresh_adaptive(&mut state);
            }
            (state.hotspot, state.balance, state.interval)
        };
        let healthy = !hotspot && balance > 0.9 && interval == MAX_CACHE_INTERVAL;
        if healthy {
            natural
        } else {
            self.route_load_aware(key, natural)
        }
    }

    fn refresh_adaptive(&self, state: &mut AdaptiveState) {
        let loads: Vec<u64> = self.loads.iter().map(|l| l.load(Ordering::Relaxed)).collect();
        let (balance, hotspot) = balance_and_hotspot(&loads);
        state.balance = balance;
        state.hotspot = hotspot;
        state.ops_since_refresh = 0;
        if hotspot || balance < 0.8 {
            state.interval = (state.interval / 2).max(MIN_CACHE_INTERVAL);
        } else if balance > 0.95 {
            state.interval = (state.interval * 2).min(MAX_CACHE_INTERVAL);
        }
        tracing::debug!(
            target: "shardkv::router",
            balance, hotspot, interval = state.interval,
            "intelligent cache refreshed"
        );
    }

    /// Adversary resistance: a key that has redirected too many times within
    /// the cooldown window is refused a redirect and sent to its natural
    /// partition instead.
    fn apply_throttle(&self, key: &K, natural: usize, candidate: usize) -> usize {
        let now = Instant::now();
        let cooldown = Duration::from_millis(REDIRECT_COOLDOWN_MS);
        let mut table = self.throttle.lock();
        let allowed = match table.get_mut(key) {
            Some(entry) if now.duration_since(entry.last) < cooldown => {
                entry.consecutive += 1;
                if entry.consecutive > MAX_CONSECUTIVE_REDIRECTS {
                    false
                } else {
                    entry.last = now;
                    true
                }
            }
            Some(entry) => {
                entry.consecutive = 1;
                entry.last = now;
                true
            }
            None => {
                table.insert(*key, ThrottleEntry { consecutive: 1, last: now });
                true
            }
        };
        drop(table);

        if allowed {
            candidate
        } else {
            let first_time = self.suspicious_patterns.fetch_add(1, Ordering::Relaxed) == 0;
            self.blocked_redirects.fetch_add(1, Ordering::Relaxed);
            if first_time {
                tracing::warn!(target: "shardkv::router", "key classified suspicious; redirect blocked");
            }
            natural
        }
    }

    fn random_partition(&self) -> usize {
        let mut rng = self.rng.lock();
        rng.gen_range(0..self.n)
    }
}

fn build_vnodes(n: usize) -> Vec<(u64, usize)> {
    let mut vnodes = Vec::with_capacity(n * VNODES_PER_PARTITION);
    for shard in 0..n {
        for vnode in 0..VNODES_PER_PARTITION {
            let id = (shard * VNODES_PER_PARTITION + vnode) as u64;
            vnodes.push((mix64(id), shard));
        }
    }
    vnodes.sort_unstable_by_key(|(h, _)| *h);
    vnodes
}

fn mean_of(loads: &[u64]) -> f64 {
    if loads.is_empty() {
        return 0.0;
    }
    loads.iter().sum::<u64>() as f64 / loads.len() as f64
}

fn min_loaded(loads: &[u64]) -> (usize, u64) {
    loads
        .iter()
        .enumerate()
        .min_by_key(|(_, &l)| l)
        .map(|(i, &l)| (i, l))
        .unwrap_or((0, 0))
}

/// `(balance_score, has_hotspot)` for a set of per-partition loads.
fn balance_and_hotspot(loads: &[u64]) -> (f64, bool) {
    let mean = mean_of(loads);
    if mean <= 0.0 {
        return (1.0, false);
    }
    let variance = loads
        .iter()
        .map(|&l| {
            let d = l as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / loads.len() as f64;
    let stddev = variance.sqrt();
    let balance = (1.0 - stddev / mean).max(0.0);
    let hotspot = loads.iter().any(|&l| l as f64 > HOTSPOT_FACTOR * mean);
    (balance, hotspot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_hash_ignores_load() {
        let router: Router<i64> = Router::new(4, Strategy::StaticHash);
        let k = 42_i64;
        let expected = (fingerprint(&k) % 4) as usize;
        assert_eq!(router.route(&k), expected);
        router.record_insertion(expected);
        assert_eq!(router.route(&k), expected);
    }

    #[test]
    fn balance_score_is_one_when_uniform() {
        let (balance, hotspot) = balance_and_hotspot(&[10, 10, 10, 10]);
        assert!((balance - 1.0).abs() < 1e-9);
        assert!(!hotspot);
    }

    #[test]
    fn hotspot_flag_trips_above_factor() {
        let (_, hotspot) = balance_and_hotspot(&[100, 1, 1, 1]);
        assert!(hotspot);
    }

    #[test]
    fn consistent_hash_routes_within_range() {
        let router: Router<i64> = Router::new(8, Strategy::ConsistentHash);
        for k in 0..200_i64 {
            let p = router.route(&k);
            assert!(p < 8);
        }
    }

    #[test]
    fn throttle_blocks_after_max_consecutive_redirects() {
        let router: Router<i64> = Router::new(8, Strategy::LoadAware);
        let natural = 0usize;
        let candidate = 1usize;
        // Drive the same key through the throttle repeatedly within the
        // cooldown window; the 5th attempt (consecutive=5) must be blocked.
        let mut last = None;
        for _ in 0..5 {
            last = Some(router.apply_throttle(&7_i64, natural, candidate));
        }
        assert_eq!(last, Some(natural));
        assert!(router.stats().blocked_redirects >= 1);
    }
}
