//! Core types shared by the sharded key-value engine
//!
//! This crate defines the foundations the engine crate builds on:
//! - [`Error`]/[`Result`]: the error taxonomy for mutating and reconfiguration
//!   operations.
//! - [`ShardKey`]: the trait a key type `K` must implement to be usable as
//!   the store's key.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;

pub use error::{Error, Result};
pub use key::ShardKey;
