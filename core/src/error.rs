//! Error types for the sharded store
//!
//! Per the core's propagation policy: operations that cannot reasonably fail
//! (lookups, bound checks, statistics) never carry an error channel. Only
//! mutating and reconfiguration operations do, and the engine never panics on
//! a missing key or a repeated insert — those are absorbed as no-ops.

use thiserror::Error;

/// Result type alias for sharded-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types surfaced by the sharded store's public API.
///
/// `KeyNotFound` is deliberately absent: the public operations that could
/// report it (`get`, `contains`, `remove`) signal absence through `bool` /
/// `Option` returns instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Attempted to drop the last remaining partition.
    #[error("cannot drop the last partition (N=1)")]
    InvalidReconfiguration,

    /// An allocation failed during the named operation.
    ///
    /// Not currently producible by this engine: Rust's global allocator
    /// aborts the process on OOM rather than returning an error from
    /// `Vec`/`BTreeMap` insertion. The variant exists for API fidelity with
    /// the host-facing contract, which explicitly allows this failure mode.
    #[error("allocation failed during {0}")]
    ResourceExhaustion(&'static str),
}
