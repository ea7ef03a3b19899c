//! # Outbound Ports
//!
//! Traits for the full node's coin store, block store and peer transport.

use async_trait::async_trait;
use shared_types::{Bytes32, CoinRecord, CoinState, HeaderBlock, Height, PeerId, ProtocolMessage};

use crate::domain::SubscriptionError;

/// Coin store - outbound port.
#[async_trait]
pub trait CoinStore: Send + Sync {
    /// States of coins under these puzzle hashes created or spent at or
    /// above `min_height`, at most `max_items`.
    async fn coin_states_by_puzzle_hashes(
        &self,
        puzzle_hashes: &[Bytes32],
        min_height: Height,
        max_items: usize,
    ) -> Result<Vec<CoinState>, SubscriptionError>;

    /// States of these coins created or spent at or above `min_height`, at
    /// most `max_items`.
    async fn coin_states_by_ids(
        &self,
        coin_ids: &[Bytes32],
        min_height: Height,
        max_items: usize,
    ) -> Result<Vec<CoinState>, SubscriptionError>;

    /// Ids of coins hinted to any of these puzzle hashes.
    async fn hinted_coin_ids(&self, puzzle_hashes: &[Bytes32]) -> Result<Vec<Bytes32>, SubscriptionError>;

    /// Records of coins created at `height`.
    async fn coins_added_at(&self, height: Height) -> Result<Vec<CoinRecord>, SubscriptionError>;

    /// Records of coins spent at `height`.
    async fn coins_removed_at(&self, height: Height) -> Result<Vec<CoinRecord>, SubscriptionError>;
}

/// Block store - outbound port.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Header hash of the best-chain block at `height`.
    async fn height_to_hash(&self, height: Height) -> Option<Bytes32>;

    /// Header block by hash, on or off the best chain.
    async fn header_block(&self, header_hash: &Bytes32) -> Option<HeaderBlock>;

    /// Current peak.
    async fn peak(&self) -> Option<HeaderBlock>;
}

/// Peer transport - outbound port.
#[async_trait]
pub trait PeerOutbound: Send + Sync {
    /// Queue a message for delivery to `peer`, preserving per-peer order.
    async fn send(&self, peer: &PeerId, message: ProtocolMessage) -> Result<(), SubscriptionError>;
}
