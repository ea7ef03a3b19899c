//! # Domain Errors
//!
//! Error types for the full-node subscription service.
//!
//! Capacity overflow is not an error: excess keys are dropped silently.

use shared_types::{Bytes32, Height, ProtocolError};
use thiserror::Error;

/// Subscription service error types.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The chain store has no block at this height or hash.
    #[error("Block not found at height {height}")]
    BlockNotFound {
        /// Height requested
        height: Height,
    },

    /// A block hash is not on the current best chain.
    #[error("Block {0} is not on the best chain")]
    NotOnBestChain(Bytes32),

    /// Backing store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Delivering a message to a peer failed.
    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable {
        /// The peer
        peer: Bytes32,
        /// Transport-level reason
        reason: String,
    },

    /// Message encoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
