//! The fixed fingerprint mixer and the constants table.
//!
//! This is the one part of the engine that is *not* free to vary between
//! implementations: natural-partition assignment must be a pure function of
//! `(K, N)` across processes and upgrades, so the mixer is reproduced here
//! bit-exactly rather than swapped for a generic `Hasher`.

use shardkv_core::ShardKey;

/// MurmurHash3 64-bit finalizer, applied to a key's raw bit pattern.
///
/// ```text
/// h := raw bits of the key, as an unsigned 64-bit value
/// h := h XOR (h >> 33)
/// h := h * 0xff51afd7ed558ccd   (wrapping)
/// h := h XOR (h >> 33)
/// h := h * 0xc4ceb9fe1a85ec53   (wrapping)
/// h := h XOR (h >> 33)
/// ```
#[inline]
pub fn mix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}

/// Fingerprint of a key: the mixer applied to its raw bit pattern.
#[inline]
pub fn fingerprint<K: ShardKey>(key: &K) -> u64 {
    mix64(key.raw_bits())
}

/// Natural partition of `key` under the given partition count.
///
/// Undefined (panics) for `n == 0`; the coordinator never constructs a store
/// with zero partitions.
#[inline]
pub fn natural_partition<K: ShardKey>(key: &K, n: usize) -> usize {
    debug_assert!(n > 0, "partition count must be positive");
    (fingerprint(key) % n as u64) as usize
}

/// Hotspot threshold relative to mean load.
pub const HOTSPOT_FACTOR: f64 = 1.5;
/// Virtual nodes per partition in `CONSISTENT_HASH`.
pub const VNODES_PER_PARTITION: usize = 16;
/// Window inside which consecutive redirects of the same key count.
pub const REDIRECT_COOLDOWN_MS: u64 = 100;
/// Max redirects of the same key allowed within the cooldown window.
pub const MAX_CONSECUTIVE_REDIRECTS: u32 = 3;
/// Refresh frequency under stress for the `INTELLIGENT` strategy.
pub const MIN_CACHE_INTERVAL: u64 = 10;
/// Refresh frequency when healthy for the `INTELLIGENT` strategy.
pub const MAX_CACHE_INTERVAL: u64 = 500;
/// Age beyond which throttling-table entries are evicted.
pub const HISTORY_EVICTION_SECS: u64 = 60;
