//! # Algorithms
//!
//! Set construction, the proof codec and proof-based validation.

pub mod merkle_set;
pub mod proof;
pub mod validation;

pub use merkle_set::{compute_merkle_set_root, MerkleSet};
pub use proof::{confirm_excluded, confirm_included, decode_proof};
pub use validation::{additions_leaves, hash_coin_ids, validate_additions, validate_removals};
