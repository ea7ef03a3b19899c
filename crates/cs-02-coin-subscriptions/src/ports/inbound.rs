//! # Inbound Ports
//!
//! What a full node answers on behalf of connected wallets.

use async_trait::async_trait;
use shared_types::{
    AdditionsResponse, HeaderBlocksResponse, PeerId, RegisterForCoinUpdates, RegisterForPhUpdates,
    RemovalsResponse, RequestAdditions, RequestHeaderBlocks, RequestRemovals,
    RespondToCoinUpdates, RespondToPhUpdates,
};

use crate::domain::SubscriptionError;

/// Wallet protocol API - inbound port.
#[async_trait]
pub trait WalletProtocolApi: Send + Sync {
    /// Subscribe a peer to puzzle hashes and backfill newly added ones.
    async fn register_for_ph_updates(
        &self,
        peer: PeerId,
        request: RegisterForPhUpdates,
    ) -> Result<RespondToPhUpdates, SubscriptionError>;

    /// Subscribe a peer to coin ids and backfill newly added ones.
    async fn register_for_coin_updates(
        &self,
        peer: PeerId,
        request: RegisterForCoinUpdates,
    ) -> Result<RespondToCoinUpdates, SubscriptionError>;

    /// Coins created in a block, with proofs when specific puzzle hashes are asked for.
    async fn request_additions(
        &self,
        request: RequestAdditions,
    ) -> Result<AdditionsResponse, SubscriptionError>;

    /// Coins spent in a block, with proofs when specific coin ids are asked for.
    async fn request_removals(
        &self,
        request: RequestRemovals,
    ) -> Result<RemovalsResponse, SubscriptionError>;

    /// A contiguous range of header blocks.
    async fn request_header_blocks(
        &self,
        request: RequestHeaderBlocks,
    ) -> Result<HeaderBlocksResponse, SubscriptionError>;

    /// Forget everything about a disconnected peer.
    async fn on_peer_disconnected(&self, peer: PeerId);
}
