//! # Chain Events
//!
//! Coin changes produced when the best chain moves, consumed by the
//! notifier.

use shared_types::{Bytes32, Coin, CoinRecord, CoinState, HeaderBlock, Height};
use std::collections::HashMap;

/// A block was appended to the best chain.
#[derive(Debug, Clone)]
pub struct BlockAdded {
    /// The new peak.
    pub block: HeaderBlock,
    /// Records created or spent in the block.
    pub changes: Vec<CoinRecord>,
    /// Hint per coin id, for coins created with one.
    pub hints: HashMap<Bytes32, Bytes32>,
}

/// The best chain was rolled back to a common ancestor.
#[derive(Debug, Clone)]
pub struct ChainReorged {
    /// Height of the last block shared by the old and new chains.
    pub fork_height: Height,
    /// Peak after the reorg.
    pub peak: HeaderBlock,
    /// Coins whose creation no longer holds.
    pub retracted: Vec<Coin>,
    /// Records whose status changed but still exist (spends undone, or
    /// coins created or spent on the new chain).
    pub changes: Vec<CoinRecord>,
    /// Hint per coin id for every coin above.
    pub hints: HashMap<Bytes32, Bytes32>,
}

impl BlockAdded {
    /// States to report, paired with each coin's hint.
    pub fn coin_states(&self) -> Vec<(CoinState, Option<Bytes32>)> {
        self.changes
            .iter()
            .map(|record| (record.coin_state(), self.hints.get(&record.name()).copied()))
            .collect()
    }
}

impl ChainReorged {
    /// Retractions first, then surviving changes, each paired with its hint.
    pub fn coin_states(&self) -> Vec<(CoinState, Option<Bytes32>)> {
        let retracted = self.retracted.iter().map(|coin| {
            (
                CoinState::retracted(*coin),
                self.hints.get(&coin.coin_id()).copied(),
            )
        });
        let changed = self
            .changes
            .iter()
            .map(|record| (record.coin_state(), self.hints.get(&record.name()).copied()));
        retracted.chain(changed).collect()
    }
}
