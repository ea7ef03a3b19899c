//! # Algorithms
//!
//! Pure header-chain checks used while following a peer's peak.

pub mod header_sync;

pub use header_sync::{find_fork_point, validate_header_batch};
