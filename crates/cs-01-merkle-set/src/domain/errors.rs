//! # Domain Errors
//!
//! Error types for the Merkle Set.
//!
//! Only malformed input is an error. A proof that fails to match a root is a
//! normal negative answer and is reported as `false` by the confirm functions.

use shared_types::IdentifierError;
use thiserror::Error;

/// Merkle Set error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleSetError {
    /// An element was not a 32-byte identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),

    /// Proof bytes do not describe a well-formed tree.
    #[error("Malformed proof: {0}")]
    MalformedProof(String),
}
