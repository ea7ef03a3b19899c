//! # Shared Types Crate
//!
//! This crate contains the identifiers, coin entities and wallet-protocol
//! messages exchanged between full nodes and light clients.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every wire shape is defined here once.
//! - **Fixed-width identifiers**: all coin ids, puzzle hashes, header hashes
//!   and Merkle roots are `Bytes32`; any other length is rejected at the
//!   boundary.
//! - **Documented encoding**: payloads use a fixed-width, big-endian,
//!   length-prefixed binary layout (see [`protocol`]).

pub mod entities;
pub mod errors;
pub mod protocol;

pub use entities::*;
pub use errors::*;
pub use protocol::*;
