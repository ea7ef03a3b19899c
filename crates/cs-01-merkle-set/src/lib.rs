//! # CS-01 Merkle Set
//!
//! Order-independent cryptographic commitment over sets of 32-byte
//! identifiers, with compact inclusion and exclusion proofs.
//!
//! **Subsystem ID:** 01
//! **Architecture:** Hexagonal (domain + pure algorithms, no I/O)
//!
//! ## Purpose
//!
//! Blocks commit to their created coins ("additions") and spent coins
//! ("removals") with a Merkle Set root. A light client holding only that
//! root can check a full node's claim about a single coin using a proof
//! a few hundred bytes long.
//!
//! ## Hash Layout
//!
//! | Node | Type byte | Hash |
//! |------|-----------|------|
//! | Empty | `0x00` | 32 zero bytes |
//! | Terminal | `0x01` | the raw identifier |
//! | Middle | `0x02` | `sha256(0x00*30 ‖ typeL ‖ typeR ‖ hashL ‖ hashR)` |
//!
//! The root of a set is the hash of its root node, except that a set with a
//! single element commits to `sha256(0x01 ‖ id)`.
//!
//! ## Module Structure
//!
//! ```text
//! cs-01-merkle-set/
//! ├── domain/          # Node types, tree arena, errors
//! └── algorithms/      # Set construction, proof codec, proof validation
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algorithms;
pub mod domain;

// Re-exports
pub use algorithms::{
    additions_leaves, compute_merkle_set_root, confirm_excluded, confirm_included, decode_proof,
    hash_coin_ids, validate_additions, validate_removals, MerkleSet,
};
pub use domain::{get_bit, hash_middle, Lookup, MerkleSetError, Node, NodeType, Tree};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
