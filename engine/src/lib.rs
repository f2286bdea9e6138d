//! A concurrent, in-memory, ordered key-value store partitioned across many
//! independent balanced-tree partitions ("shards") for parallel scalability.
//!
//! This is the sharded concurrency engine: the partition array, the router
//! (four selectable strategies with adversary resistance), the redirect
//! index that preserves single-map linearizability when a write is steered
//! away from its natural partition, and the coordinator that ties them
//! together and implements dynamic reconfiguration.
//!
//! Out of scope, by design: no network or persistence surface, no CLI or
//! benchmark harness, no specific balanced-tree implementation mandated
//! beyond `BTreeMap`'s ordering guarantees, no durability or distributed
//! consensus.
//!
//! ```
//! use shardkv_engine::{Coordinator, StoreConfig, Strategy};
//!
//! let store: Coordinator<i64, String> = Coordinator::new(StoreConfig {
//!     initial_partitions: 4,
//!     strategy: Strategy::Intelligent,
//! });
//! store.put(42, "hello".to_string());
//! assert_eq!(store.get(&42), Some("hello".to_string()));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod fingerprint;
pub mod partition;
pub mod redirect;
pub mod router;
pub mod stats;

pub use coordinator::{Coordinator, StoreConfig};
pub use fingerprint::{fingerprint, natural_partition};
pub use partition::{Partition, PartitionStats};
pub use redirect::{RedirectIndex, RedirectStats};
pub use router::{Router, RouterStats, Strategy};
pub use shardkv_core::{Error, Result, ShardKey};
pub use stats::StoreStats;
