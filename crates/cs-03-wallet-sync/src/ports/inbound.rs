//! # Inbound Ports
//!
//! What the wallet's network handlers and UI call.

use async_trait::async_trait;
use shared_types::{Bytes32, CoinStateUpdate, Height, NewPeakWallet, PeerId};

use crate::domain::{SyncOutcome, WalletSyncError};

/// Wallet sync API - inbound port.
#[async_trait]
pub trait WalletSyncApi: Send + Sync {
    /// Start following puzzle hashes.
    fn subscribe_to_puzzle_hashes(&self, puzzle_hashes: Vec<Bytes32>);

    /// Start following coin ids.
    fn subscribe_to_coin_ids(&self, coin_ids: Vec<Bytes32>);

    /// A connected full node pushed coin state changes.
    fn on_coin_state_update(&self, update: CoinStateUpdate, peer: PeerId);

    /// A connected full node announced a new peak.
    fn on_new_peak(&self, peak: NewPeakWallet, peer: PeerId);

    /// Wait for the next queued item and process it.
    async fn process_next(&self) -> Result<SyncOutcome, WalletSyncError>;

    /// Process everything queued right now.
    async fn process_pending(&self) -> Result<Vec<SyncOutcome>, WalletSyncError>;

    /// Height of the trusted peak.
    fn peak_height(&self) -> Height;
}
