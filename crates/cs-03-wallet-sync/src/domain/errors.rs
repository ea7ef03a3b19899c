//! # Domain Errors
//!
//! Error types for wallet sync.
//!
//! A proof that fails to verify is not an error: validation returns `false`
//! and the peer that sent it is closed.

use shared_types::{Bytes32, Height, PeerId, ProtocolError};
use thiserror::Error;

/// Wallet sync error types.
///
/// `Clone` so that every caller sharing one in-flight request observes the
/// same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletSyncError {
    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A peer round trip exceeded its deadline.
    #[error("Request to peer {peer} timed out after {secs}s")]
    Timeout {
        /// The peer
        peer: PeerId,
        /// Deadline that elapsed
        secs: u64,
    },

    /// The peer connection is closed.
    #[error("Peer {0} closed")]
    PeerClosed(PeerId),

    /// The peer answered with a reject message.
    #[error("Peer {peer} rejected request: {reason}")]
    PeerRejected {
        /// The peer
        peer: PeerId,
        /// What was rejected
        reason: String,
    },

    /// Every candidate peer failed or none is connected.
    #[error("No peers available")]
    NoPeersAvailable,

    /// A message names a peer that is not connected.
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// Header blocks do not link.
    #[error("Invalid header chain: {0}")]
    InvalidHeaderChain(String),

    /// The peer's announced peak does not match the headers it served.
    #[error("Peak mismatch at height {height}: expected {expected}")]
    PeakMismatch {
        /// Announced height
        height: Height,
        /// Announced header hash
        expected: Bytes32,
    },

    /// Wallet store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Message encoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl WalletSyncError {
    /// Whether the failure is the peer's fault and the next candidate should
    /// be tried.
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            WalletSyncError::Timeout { .. }
                | WalletSyncError::PeerClosed(_)
                | WalletSyncError::PeerRejected { .. }
                | WalletSyncError::InvalidHeaderChain(_)
                | WalletSyncError::PeakMismatch { .. }
                | WalletSyncError::Protocol(_)
        )
    }
}
