//! # In-Memory Chain Store
//!
//! A single-chain coin and block store for tests and simulations. Blocks are
//! appended with `add_block` and undone with `rollback_to`; both return the
//! chain event the notifier consumes.

use async_trait::async_trait;
use cs_01_merkle_set::{additions_leaves, compute_merkle_set_root};
use parking_lot::RwLock;
use shared_types::{
    std_hash, Bytes32, Coin, CoinRecord, CoinState, HeaderBlock, Height, PuzzleHashCoins,
    TransactionsInfo,
};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::{BlockAdded, ChainReorged, SubscriptionError};
use crate::ports::{BlockStore, CoinStore};

#[derive(Debug, Default)]
struct ChainData {
    blocks: HashMap<Bytes32, HeaderBlock>,
    best_chain: Vec<Bytes32>,
    coins: HashMap<Bytes32, CoinRecord>,
    hints: HashMap<Bytes32, Bytes32>,
}

impl ChainData {
    fn tip(&self) -> Option<&HeaderBlock> {
        self.best_chain.last().and_then(|hash| self.blocks.get(hash))
    }

    fn states_matching(
        &self,
        matches: impl Fn(&CoinRecord) -> bool,
        min_height: Height,
        max_items: usize,
    ) -> Vec<CoinState> {
        let mut records: Vec<&CoinRecord> = self
            .coins
            .values()
            .filter(|r| matches(*r))
            .filter(|r| r.confirmed_block_index >= min_height || r.spent_block_index >= min_height)
            .collect();
        records.sort_by_key(|r| (r.confirmed_block_index, r.name()));
        records
            .into_iter()
            .take(max_items)
            .map(CoinRecord::coin_state)
            .collect()
    }
}

/// In-memory coin and block store.
#[derive(Debug)]
pub struct InMemoryChainStore {
    data: RwLock<ChainData>,
}

impl Default for InMemoryChainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChainStore {
    /// A store holding only a genesis block at height 0.
    pub fn new() -> Self {
        let genesis = HeaderBlock {
            height: 0,
            header_hash: std_hash(b"genesis"),
            prev_header_hash: Bytes32::ZERO,
            weight: 1,
            transactions_info: None,
        };
        let mut data = ChainData::default();
        data.best_chain.push(genesis.header_hash);
        data.blocks.insert(genesis.header_hash, genesis);
        Self {
            data: RwLock::new(data),
        }
    }

    /// Height of the current peak.
    pub fn tip_height(&self) -> Height {
        self.data.read().best_chain.len().saturating_sub(1) as Height
    }

    /// Header block at a best-chain height.
    pub fn block_at(&self, height: Height) -> Option<HeaderBlock> {
        let data = self.data.read();
        data.best_chain
            .get(height as usize)
            .and_then(|hash| data.blocks.get(hash))
            .cloned()
    }

    /// Append a transaction block creating `additions` (each with an optional
    /// hint) and spending the coins named in `removals`.
    pub fn add_block(
        &self,
        additions: &[(Coin, Option<Bytes32>)],
        removals: &[Bytes32],
        timestamp: u64,
    ) -> Result<BlockAdded, SubscriptionError> {
        let mut data = self.data.write();
        let (prev_hash, prev_weight) = match data.tip() {
            Some(tip) => (tip.header_hash, tip.weight),
            None => (Bytes32::ZERO, 0),
        };
        let height = data.best_chain.len() as Height;

        let mut changed: BTreeMap<Bytes32, CoinRecord> = BTreeMap::new();
        let mut hints = HashMap::new();
        let mut groups: BTreeMap<Bytes32, Vec<Coin>> = BTreeMap::new();

        for (coin, hint) in additions {
            let coin_id = coin.coin_id();
            if data.coins.contains_key(&coin_id) || changed.contains_key(&coin_id) {
                return Err(SubscriptionError::Store(format!("coin {coin_id} already exists")));
            }
            changed.insert(coin_id, CoinRecord::new(*coin, height, timestamp));
            groups.entry(coin.puzzle_hash).or_default().push(*coin);
            if let Some(hint) = hint {
                hints.insert(coin_id, *hint);
            }
        }

        let mut removed_ids = Vec::with_capacity(removals.len());
        for coin_id in removals {
            let record = match changed.get(coin_id) {
                Some(record) => *record,
                None => *data
                    .coins
                    .get(coin_id)
                    .ok_or_else(|| SubscriptionError::Store(format!("unknown coin {coin_id}")))?,
            };
            if record.is_spent() {
                return Err(SubscriptionError::Store(format!("coin {coin_id} already spent")));
            }
            changed.insert(
                *coin_id,
                CoinRecord {
                    spent_block_index: height,
                    ..record
                },
            );
            removed_ids.push(*coin_id);
        }

        let groups: Vec<PuzzleHashCoins> = groups
            .into_iter()
            .map(|(puzzle_hash, coins)| PuzzleHashCoins { puzzle_hash, coins })
            .collect();
        let info = TransactionsInfo {
            additions_root: compute_merkle_set_root(&additions_leaves(&groups)),
            removals_root: compute_merkle_set_root(&removed_ids),
            timestamp,
        };

        let mut preimage = Vec::with_capacity(32 * 3 + 12);
        preimage.extend_from_slice(prev_hash.as_bytes());
        preimage.extend_from_slice(&height.to_be_bytes());
        preimage.extend_from_slice(info.additions_root.as_bytes());
        preimage.extend_from_slice(info.removals_root.as_bytes());
        preimage.extend_from_slice(&timestamp.to_be_bytes());
        let block = HeaderBlock {
            height,
            header_hash: std_hash(&preimage),
            prev_header_hash: prev_hash,
            weight: prev_weight + 1,
            transactions_info: Some(info),
        };

        for (coin_id, record) in &changed {
            data.coins.insert(*coin_id, *record);
        }
        data.hints.extend(hints.iter().map(|(k, v)| (*k, *v)));
        data.best_chain.push(block.header_hash);
        data.blocks.insert(block.header_hash, block.clone());

        let hints = changed
            .keys()
            .filter_map(|id| data.hints.get(id).map(|hint| (*id, *hint)))
            .collect();

        Ok(BlockAdded {
            block,
            changes: changed.into_values().collect(),
            hints,
        })
    }

    /// Roll the best chain back so `fork_height` is the peak.
    ///
    /// Coins created above the fork are deleted and reported as retracted;
    /// coins spent above the fork become unspent. Orphaned blocks stay
    /// retrievable by hash but leave the best chain.
    pub fn rollback_to(&self, fork_height: Height) -> Result<ChainReorged, SubscriptionError> {
        let mut data = self.data.write();
        let tip_height = data.best_chain.len().saturating_sub(1) as Height;
        if fork_height >= tip_height {
            return Err(SubscriptionError::Store(format!(
                "fork height {fork_height} is not below tip {tip_height}"
            )));
        }
        data.best_chain.truncate(fork_height as usize + 1);

        let deleted: HashSet<Bytes32> = data
            .coins
            .iter()
            .filter(|(_, r)| r.confirmed_block_index > fork_height)
            .map(|(id, _)| *id)
            .collect();

        let mut hints = HashMap::new();
        let mut retracted = Vec::with_capacity(deleted.len());
        for coin_id in &deleted {
            if let Some(record) = data.coins.remove(coin_id) {
                retracted.push(record.coin);
            }
            if let Some(hint) = data.hints.remove(coin_id) {
                hints.insert(*coin_id, hint);
            }
        }
        retracted.sort_by_key(Coin::coin_id);

        let mut changes = Vec::new();
        for record in data.coins.values_mut() {
            if record.spent_block_index > fork_height {
                record.spent_block_index = 0;
                changes.push(*record);
            }
        }
        changes.sort_by_key(CoinRecord::name);
        for record in &changes {
            if let Some(hint) = data.hints.get(&record.name()) {
                hints.insert(record.name(), *hint);
            }
        }

        let peak = data
            .tip()
            .cloned()
            .ok_or_else(|| SubscriptionError::BlockNotFound { height: fork_height })?;

        Ok(ChainReorged {
            fork_height,
            peak,
            retracted,
            changes,
            hints,
        })
    }
}

#[async_trait]
impl CoinStore for InMemoryChainStore {
    async fn coin_states_by_puzzle_hashes(
        &self,
        puzzle_hashes: &[Bytes32],
        min_height: Height,
        max_items: usize,
    ) -> Result<Vec<CoinState>, SubscriptionError> {
        let wanted: HashSet<&Bytes32> = puzzle_hashes.iter().collect();
        Ok(self.data.read().states_matching(
            |r| wanted.contains(&r.coin.puzzle_hash),
            min_height,
            max_items,
        ))
    }

    async fn coin_states_by_ids(
        &self,
        coin_ids: &[Bytes32],
        min_height: Height,
        max_items: usize,
    ) -> Result<Vec<CoinState>, SubscriptionError> {
        let wanted: HashSet<&Bytes32> = coin_ids.iter().collect();
        Ok(self
            .data
            .read()
            .states_matching(|r| wanted.contains(&r.name()), min_height, max_items))
    }

    async fn hinted_coin_ids(&self, puzzle_hashes: &[Bytes32]) -> Result<Vec<Bytes32>, SubscriptionError> {
        let wanted: HashSet<&Bytes32> = puzzle_hashes.iter().collect();
        let mut ids: Vec<Bytes32> = self
            .data
            .read()
            .hints
            .iter()
            .filter(|(_, hint)| wanted.contains(hint))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn coins_added_at(&self, height: Height) -> Result<Vec<CoinRecord>, SubscriptionError> {
        let mut records: Vec<CoinRecord> = self
            .data
            .read()
            .coins
            .values()
            .filter(|r| r.confirmed_block_index == height)
            .copied()
            .collect();
        records.sort_by_key(CoinRecord::name);
        Ok(records)
    }

    async fn coins_removed_at(&self, height: Height) -> Result<Vec<CoinRecord>, SubscriptionError> {
        if height == 0 {
            return Ok(Vec::new());
        }
        let mut records: Vec<CoinRecord> = self
            .data
            .read()
            .coins
            .values()
            .filter(|r| r.spent_block_index == height)
            .copied()
            .collect();
        records.sort_by_key(CoinRecord::name);
        Ok(records)
    }
}

#[async_trait]
impl BlockStore for InMemoryChainStore {
    async fn height_to_hash(&self, height: Height) -> Option<Bytes32> {
        self.data.read().best_chain.get(height as usize).copied()
    }

    async fn header_block(&self, header_hash: &Bytes32) -> Option<HeaderBlock> {
        self.data.read().blocks.get(header_hash).cloned()
    }

    async fn peak(&self) -> Option<HeaderBlock> {
        self.data.read().tip().cloned()
    }
}
