//! Aggregate store-wide statistics.

use crate::partition::PartitionStats;
use crate::redirect::RedirectStats;
use crate::router::RouterStats;

/// Point-in-time, lock-free (and therefore approximate) snapshot of every
/// statistic the store tracks. The per-partition, router, and redirect-index
/// figures may come from slightly different instants.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoreStats<K> {
    /// Sum of all live partition sizes.
    pub total_size: usize,
    /// Per-partition statistics, indexed by partition id.
    pub partitions: Vec<PartitionStats<K>>,
    /// Router load and adversary-resistance statistics.
    pub router: RouterStats,
    /// Redirect-index statistics.
    pub redirects: RedirectStats,
}
