//! # Wallet Sync Configuration
//!
//! Peer timeouts, cache capacities and header batch size for the wallet.

use crate::domain::WalletSyncError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wallet sync configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletSyncConfig {
    /// Deadline for one peer round trip, in seconds.
    pub request_timeout_secs: u64,

    /// Header blocks cached by height.
    pub block_cache_size: usize,

    /// In-flight header range requests shared between callers.
    pub block_request_cache_size: usize,

    /// Sub-epoch-summary responses cached by height.
    pub ses_cache_size: usize,

    /// Coin state hashes that already passed validation.
    pub states_validated_cache_size: usize,

    /// Block timestamps cached by height.
    pub timestamp_cache_size: usize,

    /// Header hashes already linked to the trusted chain.
    pub blocks_validated_cache_size: usize,

    /// Header blocks requested per round trip while syncing to a new peak.
    pub max_header_batch: u32,
}

impl Default for WalletSyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            block_cache_size: 100,
            block_request_cache_size: 300,
            ses_cache_size: 1000,
            states_validated_cache_size: 1000,
            timestamp_cache_size: 1000,
            blocks_validated_cache_size: 1000,
            max_header_batch: 32,
        }
    }
}

impl WalletSyncConfig {
    /// Create a config for testing (short timeout, small caches).
    pub fn for_testing() -> Self {
        Self {
            request_timeout_secs: 2,
            block_cache_size: 16,
            block_request_cache_size: 16,
            ses_cache_size: 16,
            states_validated_cache_size: 64,
            timestamp_cache_size: 16,
            blocks_validated_cache_size: 64,
            max_header_batch: 4,
        }
    }

    /// Peer round-trip deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), WalletSyncError> {
        if self.request_timeout_secs == 0 {
            return Err(WalletSyncError::InvalidConfig(
                "request_timeout_secs cannot be 0".to_string(),
            ));
        }
        let caches = [
            ("block_cache_size", self.block_cache_size),
            ("block_request_cache_size", self.block_request_cache_size),
            ("ses_cache_size", self.ses_cache_size),
            ("states_validated_cache_size", self.states_validated_cache_size),
            ("timestamp_cache_size", self.timestamp_cache_size),
            ("blocks_validated_cache_size", self.blocks_validated_cache_size),
        ];
        if let Some((name, _)) = caches.iter().find(|(_, size)| *size == 0) {
            return Err(WalletSyncError::InvalidConfig(format!("{name} cannot be 0")));
        }
        if self.max_header_batch == 0 || self.max_header_batch > shared_types::MAX_BLOCK_COUNT_PER_REQUEST {
            return Err(WalletSyncError::InvalidConfig(format!(
                "max_header_batch must be in 1..={}",
                shared_types::MAX_BLOCK_COUNT_PER_REQUEST
            )));
        }
        Ok(())
    }

    /// Builder-style method to set the peer timeout
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Builder-style method to set the header batch size
    pub fn with_max_header_batch(mut self, batch: u32) -> Self {
        self.max_header_batch = batch;
        self
    }
}
