//! # Subscription Configuration
//!
//! Per-peer capacity limits for the full node's wallet-protocol service.

use crate::domain::SubscriptionError;
use serde::{Deserialize, Serialize};
use shared_types::PeerId;
use std::collections::HashSet;

/// Subscription and response-size limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Subscriptions an untrusted peer may hold, puzzle hashes and coin ids
    /// combined.
    pub max_subscribe_items: usize,

    /// Subscriptions a trusted peer may hold.
    pub trusted_max_subscribe_items: usize,

    /// Coin states returned in one registration response (untrusted).
    pub max_subscribe_response_items: usize,

    /// Coin states returned in one registration response (trusted).
    pub trusted_max_subscribe_response_items: usize,

    /// Peers granted the trusted limits.
    pub trusted_peers: HashSet<PeerId>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_subscribe_items: 200_000,
            trusted_max_subscribe_items: 2_000_000,
            max_subscribe_response_items: 100_000,
            trusted_max_subscribe_response_items: 500_000,
            trusted_peers: HashSet::new(),
        }
    }
}

impl SubscriptionConfig {
    /// Create a config for testing (small limits).
    pub fn for_testing() -> Self {
        Self {
            max_subscribe_items: 10,
            trusted_max_subscribe_items: 100,
            max_subscribe_response_items: 100,
            trusted_max_subscribe_response_items: 1_000,
            trusted_peers: HashSet::new(),
        }
    }

    /// Whether `peer` gets the trusted limits.
    pub fn is_trusted(&self, peer: &PeerId) -> bool {
        self.trusted_peers.contains(peer)
    }

    /// Subscription cap for `peer`.
    pub fn max_items_for(&self, peer: &PeerId) -> usize {
        if self.is_trusted(peer) {
            self.trusted_max_subscribe_items
        } else {
            self.max_subscribe_items
        }
    }

    /// Response-size cap for `peer`.
    pub fn max_response_items_for(&self, peer: &PeerId) -> usize {
        if self.is_trusted(peer) {
            self.trusted_max_subscribe_response_items
        } else {
            self.max_subscribe_response_items
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), SubscriptionError> {
        if self.trusted_max_subscribe_items < self.max_subscribe_items {
            return Err(SubscriptionError::InvalidConfig(format!(
                "trusted_max_subscribe_items ({}) below max_subscribe_items ({})",
                self.trusted_max_subscribe_items, self.max_subscribe_items
            )));
        }
        if self.max_subscribe_response_items == 0 || self.trusted_max_subscribe_response_items == 0
        {
            return Err(SubscriptionError::InvalidConfig(
                "response item limits cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder-style method to set the untrusted subscription cap
    pub fn with_max_subscribe_items(mut self, max: usize) -> Self {
        self.max_subscribe_items = max;
        self
    }

    /// Builder-style method to set the trusted subscription cap
    pub fn with_trusted_max_subscribe_items(mut self, max: usize) -> Self {
        self.trusted_max_subscribe_items = max;
        self
    }

    /// Builder-style method to add a trusted peer
    pub fn with_trusted_peer(mut self, peer: PeerId) -> Self {
        self.trusted_peers.insert(peer);
        self
    }
}
