//! Boundary behaviors: degenerate ranges, reconfiguration edge cases, and
//! adversarial load.

mod common;

use common::keys_with_natural_partition;
use shardkv_core::Error;
use shardkv_engine::{Coordinator, StoreConfig, Strategy};

fn store(n: usize, strategy: Strategy) -> Coordinator<i64, i64> {
    Coordinator::new(StoreConfig { initial_partitions: n, strategy })
}

/// `range(lo, hi)` with `lo > hi` is empty, never a panic or a
/// reversed-order scan.
#[test]
fn range_with_lo_greater_than_hi_is_empty() {
    let c = store(4, Strategy::StaticHash);
    for k in 0..50_i64 {
        c.put(k, k);
    }
    assert!(c.range(30, 10).is_empty());
    assert!(c.range(i64::MAX, i64::MIN).is_empty());
}

/// `range` endpoints are inclusive on both sides, including when `lo`
/// and `hi` coincide with an absent key.
#[test]
fn range_endpoints_are_inclusive() {
    let c = store(4, Strategy::StaticHash);
    for k in (0..100_i64).step_by(2) {
        c.put(k, k);
    }
    // Exact boundaries present.
    let got = c.range(10, 20);
    assert_eq!(got.first().map(|(k, _)| *k), Some(10));
    assert_eq!(got.last().map(|(k, _)| *k), Some(20));

    // Boundaries absent (odd numbers were never inserted) still include the
    // present keys at the edges of the closed interval.
    let got = c.range(11, 19);
    assert_eq!(got.first().map(|(k, _)| *k), Some(12));
    assert_eq!(got.last().map(|(k, _)| *k), Some(18));
}

/// `drop_partition` on a single-partition store is rejected, and the
/// store is left completely unchanged.
#[test]
fn drop_partition_on_n_one_errors_and_is_unchanged() {
    let c = store(1, Strategy::StaticHash);
    c.put(1, 10);
    c.put(2, 20);

    assert_eq!(c.drop_partition(), Err(Error::InvalidReconfiguration));

    assert_eq!(c.partition_count(), 1);
    assert_eq!(c.get(&1), Some(10));
    assert_eq!(c.get(&2), Some(20));
    assert_eq!(c.size(), 2);
}

/// under a deliberately adversarial hotspot workload, `LOAD_AWARE` and
/// `INTELLIGENT` keep the balance score from collapsing: it never drops
/// below 0.5 once enough operations have been observed to let the
/// adversary-resistance machinery respond.
#[test]
fn balance_score_stays_above_half_under_hotspot_load() {
    for strategy in [Strategy::LoadAware, Strategy::Intelligent] {
        let n = 8;
        let c = store(n, strategy);

        // Every key below collides on natural partition 0 by construction;
        // a naive router would let partition 0's load run away unchecked.
        let keys = keys_with_natural_partition(n, 0, 1000 * n);
        for (i, k) in keys.iter().enumerate() {
            c.put(*k, i as i64);
        }

        let stats = c.stats();
        assert!(
            stats.router.balance_score >= 0.5,
            "{strategy:?}: balance score {} fell below 0.5 under hotspot load",
            stats.router.balance_score
        );
    }
}
