//! # In-Memory Wallet Store
//!
//! Coin states keyed by coin id, behind a `parking_lot` lock.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{Bytes32, CoinState, Height};
use std::collections::HashMap;

use crate::domain::WalletSyncError;
use crate::ports::WalletCoinStore;

/// Wallet coin store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryWalletStore {
    states: RwLock<HashMap<Bytes32, CoinState>>,
}

impl InMemoryWalletStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known coins.
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Whether no coin is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of unspent amounts.
    pub fn unspent_balance(&self) -> u64 {
        self.states
            .read()
            .values()
            .filter(|s| s.created_height.is_some() && s.spent_height.is_none())
            .map(|s| s.coin.amount)
            .sum()
    }
}

#[async_trait]
impl WalletCoinStore for InMemoryWalletStore {
    async fn get_coin_state(&self, coin_id: &Bytes32) -> Result<Option<CoinState>, WalletSyncError> {
        Ok(self.states.read().get(coin_id).copied())
    }

    async fn apply_state(&self, state: CoinState) -> Result<(), WalletSyncError> {
        self.states.write().insert(state.coin.coin_id(), state);
        Ok(())
    }

    async fn remove_coin(&self, coin_id: &Bytes32) -> Result<bool, WalletSyncError> {
        Ok(self.states.write().remove(coin_id).is_some())
    }

    async fn rollback_to(&self, height: Height) -> Result<usize, WalletSyncError> {
        let mut states = self.states.write();
        let before = states.len();
        states.retain(|_, s| s.created_height.is_some_and(|h| h <= height));
        let mut touched = before - states.len();
        for state in states.values_mut() {
            if state.spent_height.is_some_and(|h| h > height) {
                state.spent_height = None;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn coin_states(&self) -> Result<Vec<CoinState>, WalletSyncError> {
        let mut states: Vec<CoinState> = self.states.read().values().copied().collect();
        states.sort();
        Ok(states)
    }
}
