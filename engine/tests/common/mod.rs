//! Shared helpers for the integration test suite.

use shardkv_engine::natural_partition;

/// The first `count` non-negative `i64`s whose natural partition under `n`
/// partitions equals `target`. Used to construct genuine hotspot workloads
/// deterministically, rather than assuming a particular key pattern happens
/// to collide under the MurmurHash3 finalizer.
pub fn keys_with_natural_partition(n: usize, target: usize, count: usize) -> Vec<i64> {
    (0i64..)
        .filter(|k| natural_partition(k, n) == target)
        .take(count)
        .collect()
}
