//! # Outbound Ports
//!
//! Traits for the full nodes the wallet talks to and for its coin store.

use async_trait::async_trait;
use cs_01_merkle_set::{additions_leaves, compute_merkle_set_root, hash_coin_ids, MerkleSet};
use parking_lot::RwLock;
use shared_types::{
    std_hash, AdditionProof, AdditionsResponse, Bytes32, Coin, CoinState, HeaderBlock,
    HeaderBlocksResponse, Height, PeerId, PuzzleHashCoins, RegisterForCoinUpdates,
    RegisterForPhUpdates, RejectAdditionsRequest, RejectHeaderBlocks, RejectRemovalsRequest,
    RemovalEntry, RemovalProof, RemovalsResponse, RequestAdditions, RequestHeaderBlocks,
    RequestRemovals, RequestSesInfo, RespondAdditions, RespondHeaderBlocks, RespondRemovals,
    RespondSesInfo, RespondToCoinUpdates, RespondToPhUpdates, TransactionsInfo,
    MAX_BLOCK_COUNT_PER_REQUEST,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::domain::WalletSyncError;

/// Full node connection - outbound port.
///
/// Every call is one round trip; the caller applies the timeout.
#[async_trait]
pub trait FullNodePeer: Send + Sync {
    /// Identity of the remote node.
    fn peer_id(&self) -> PeerId;

    /// Subscribe to puzzle hashes.
    async fn register_for_ph_updates(
        &self,
        request: RegisterForPhUpdates,
    ) -> Result<RespondToPhUpdates, WalletSyncError>;

    /// Subscribe to coin ids.
    async fn register_for_coin_updates(
        &self,
        request: RegisterForCoinUpdates,
    ) -> Result<RespondToCoinUpdates, WalletSyncError>;

    /// Coins a block created.
    async fn request_additions(
        &self,
        request: RequestAdditions,
    ) -> Result<AdditionsResponse, WalletSyncError>;

    /// Coins a block spent.
    async fn request_removals(
        &self,
        request: RequestRemovals,
    ) -> Result<RemovalsResponse, WalletSyncError>;

    /// A contiguous range of header blocks.
    async fn request_header_blocks(
        &self,
        request: RequestHeaderBlocks,
    ) -> Result<HeaderBlocksResponse, WalletSyncError>;

    /// Sub-epoch summaries.
    async fn request_ses_info(
        &self,
        request: RequestSesInfo,
    ) -> Result<RespondSesInfo, WalletSyncError>;

    /// Close the connection. Idempotent.
    async fn close(&self);
}

/// Wallet coin store - outbound port.
#[async_trait]
pub trait WalletCoinStore: Send + Sync {
    /// Current state of a coin.
    async fn get_coin_state(&self, coin_id: &Bytes32) -> Result<Option<CoinState>, WalletSyncError>;

    /// Insert or replace a coin's state.
    async fn apply_state(&self, state: CoinState) -> Result<(), WalletSyncError>;

    /// Forget a coin. Returns whether it was known.
    async fn remove_coin(&self, coin_id: &Bytes32) -> Result<bool, WalletSyncError>;

    /// Undo everything above `height`: coins created above it are removed,
    /// coins spent above it become unspent. Returns the number of coins
    /// touched.
    async fn rollback_to(&self, height: Height) -> Result<usize, WalletSyncError>;

    /// Every known coin state.
    async fn coin_states(&self) -> Result<Vec<CoinState>, WalletSyncError>;
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

#[derive(Debug, Default)]
struct MockChain {
    blocks: Vec<HeaderBlock>,
    added: Vec<Vec<Coin>>,
    removed: Vec<Vec<Coin>>,
    states: HashMap<Bytes32, CoinState>,
    blocks_created: u64,
}

impl MockChain {
    fn tx_block(&self, height: Height, header_hash: Option<Bytes32>) -> Option<&HeaderBlock> {
        let block = self.blocks.get(height as usize)?;
        if header_hash.is_some_and(|hash| hash != block.header_hash) || !block.is_transaction_block() {
            return None;
        }
        Some(block)
    }

    fn states_where(&self, min_height: Height, matches: impl Fn(&CoinState) -> bool) -> Vec<CoinState> {
        let mut states: Vec<CoinState> = self
            .states
            .values()
            .filter(|s| matches(s) && s.last_change_height().is_some_and(|h| h >= min_height))
            .copied()
            .collect();
        states.sort();
        states
    }
}

/// Scripted full node for testing.
///
/// Serves a chain built with [`MockFullNodePeer::push_block`], with real
/// Merkle Set proofs. Two mocks fed the same blocks in the same order serve
/// the same chain. Can be told to stall (every call hangs), to fail
/// (every call errors) or to tamper with proofs.
#[derive(Debug)]
pub struct MockFullNodePeer {
    id: PeerId,
    chain: RwLock<MockChain>,
    closed: AtomicBool,
    failing: AtomicBool,
    stalled: AtomicBool,
    tampering: AtomicBool,
    header_requests: AtomicUsize,
}

impl MockFullNodePeer {
    /// A node whose chain holds only a genesis block.
    pub fn new(id: PeerId) -> Self {
        let genesis = Self::genesis();
        let chain = MockChain {
            blocks: vec![genesis],
            added: vec![Vec::new()],
            removed: vec![Vec::new()],
            ..MockChain::default()
        };
        Self {
            id,
            chain: RwLock::new(chain),
            closed: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            tampering: AtomicBool::new(false),
            header_requests: AtomicUsize::new(0),
        }
    }

    /// The genesis block every mock starts from.
    pub fn genesis() -> HeaderBlock {
        HeaderBlock {
            height: 0,
            header_hash: std_hash(b"genesis"),
            prev_header_hash: Bytes32::ZERO,
            weight: 1,
            transactions_info: None,
        }
    }

    /// Append a transaction block creating `additions` and spending `removals`.
    pub fn push_block(&self, additions: &[Coin], removals: &[Coin]) -> HeaderBlock {
        let mut chain = self.chain.write();
        let prev = chain.blocks[chain.blocks.len() - 1].clone();
        let height = prev.height + 1;

        let mut groups: BTreeMap<Bytes32, Vec<Coin>> = BTreeMap::new();
        for coin in additions {
            groups.entry(coin.puzzle_hash).or_default().push(*coin);
            chain
                .states
                .insert(coin.coin_id(), CoinState::new(*coin, Some(height), None));
        }
        for coin in removals {
            let id = coin.coin_id();
            let created = chain.states.get(&id).and_then(|s| s.created_height);
            chain.states.insert(id, CoinState::new(*coin, created, Some(height)));
        }
        let groups: Vec<PuzzleHashCoins> = groups
            .into_iter()
            .map(|(puzzle_hash, coins)| PuzzleHashCoins { puzzle_hash, coins })
            .collect();
        let removed_ids: Vec<Bytes32> = removals.iter().map(Coin::coin_id).collect();
        let info = TransactionsInfo {
            additions_root: compute_merkle_set_root(&additions_leaves(&groups)),
            removals_root: compute_merkle_set_root(&removed_ids),
            timestamp: 1_000 + height as u64,
        };

        chain.blocks_created += 1;
        let mut preimage = Vec::with_capacity(32 * 3 + 12);
        preimage.extend_from_slice(prev.header_hash.as_bytes());
        preimage.extend_from_slice(&height.to_be_bytes());
        preimage.extend_from_slice(&chain.blocks_created.to_be_bytes());
        preimage.extend_from_slice(info.additions_root.as_bytes());
        preimage.extend_from_slice(info.removals_root.as_bytes());

        let block = HeaderBlock {
            height,
            header_hash: std_hash(&preimage),
            prev_header_hash: prev.header_hash,
            weight: prev.weight + 1,
            transactions_info: Some(info),
        };
        chain.blocks.push(block.clone());
        chain.added.push(additions.to_vec());
        chain.removed.push(removals.to_vec());
        block
    }

    /// Drop every block above `height`.
    pub fn rollback_to(&self, height: Height) {
        let mut chain = self.chain.write();
        let keep = height as usize + 1;
        chain.blocks.truncate(keep);
        chain.added.truncate(keep);
        chain.removed.truncate(keep);
        chain
            .states
            .retain(|_, s| s.created_height.is_some_and(|h| h <= height));
        for state in chain.states.values_mut() {
            if state.spent_height.is_some_and(|h| h > height) {
                state.spent_height = None;
            }
        }
    }

    /// Current peak.
    pub fn peak(&self) -> HeaderBlock {
        let chain = self.chain.read();
        chain.blocks[chain.blocks.len() - 1].clone()
    }

    /// Block at `height`.
    pub fn block_at(&self, height: Height) -> Option<HeaderBlock> {
        self.chain.read().blocks.get(height as usize).cloned()
    }

    /// Make every call hang.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Make every call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Corrupt every proof served from now on.
    pub fn set_tampering(&self, tampering: bool) {
        self.tampering.store(tampering, Ordering::SeqCst);
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of header range requests served.
    pub fn header_requests(&self) -> usize {
        self.header_requests.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> Result<(), WalletSyncError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.closed.load(Ordering::SeqCst) || self.failing.load(Ordering::SeqCst) {
            return Err(WalletSyncError::PeerClosed(self.id));
        }
        Ok(())
    }

    fn finish_proof(&self, mut proof: Vec<u8>) -> Vec<u8> {
        if self.tampering.load(Ordering::SeqCst) {
            match proof.last_mut() {
                Some(byte) => *byte ^= 0xff,
                None => proof.push(0xff),
            }
        }
        proof
    }
}

#[async_trait]
impl FullNodePeer for MockFullNodePeer {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    async fn register_for_ph_updates(
        &self,
        request: RegisterForPhUpdates,
    ) -> Result<RespondToPhUpdates, WalletSyncError> {
        self.begin().await?;
        let coin_states = self.chain.read().states_where(request.min_height, |s| {
            request.puzzle_hashes.contains(&s.coin.puzzle_hash)
        });
        Ok(RespondToPhUpdates {
            puzzle_hashes: request.puzzle_hashes,
            min_height: request.min_height,
            coin_states,
        })
    }

    async fn register_for_coin_updates(
        &self,
        request: RegisterForCoinUpdates,
    ) -> Result<RespondToCoinUpdates, WalletSyncError> {
        self.begin().await?;
        let coin_states = self.chain.read().states_where(request.min_height, |s| {
            request.coin_ids.contains(&s.coin.coin_id())
        });
        Ok(RespondToCoinUpdates {
            coin_ids: request.coin_ids,
            min_height: request.min_height,
            coin_states,
        })
    }

    async fn request_additions(
        &self,
        request: RequestAdditions,
    ) -> Result<AdditionsResponse, WalletSyncError> {
        self.begin().await?;
        let chain = self.chain.read();
        let Some(block) = chain.tx_block(request.height, request.header_hash) else {
            return Ok(AdditionsResponse::Reject(RejectAdditionsRequest {
                height: request.height,
                header_hash: request.header_hash,
            }));
        };

        let mut grouped: BTreeMap<Bytes32, Vec<Coin>> = BTreeMap::new();
        for coin in &chain.added[block.height as usize] {
            grouped.entry(coin.puzzle_hash).or_default().push(*coin);
        }
        let all: Vec<PuzzleHashCoins> = grouped
            .iter()
            .map(|(puzzle_hash, coins)| PuzzleHashCoins {
                puzzle_hash: *puzzle_hash,
                coins: coins.clone(),
            })
            .collect();

        let (coins, proofs) = match request.puzzle_hashes {
            None => (all, None),
            Some(puzzle_hashes) => {
                let set = MerkleSet::new(&additions_leaves(&all));
                let mut coins = Vec::new();
                let mut proofs = Vec::new();
                for puzzle_hash in puzzle_hashes {
                    let group = grouped.get(&puzzle_hash).cloned().unwrap_or_default();
                    let coin_list_proof = (!group.is_empty()).then(|| {
                        let ids: Vec<Bytes32> = group.iter().map(Coin::coin_id).collect();
                        self.finish_proof(set.is_included(&hash_coin_ids(&ids)).1)
                    });
                    proofs.push(AdditionProof {
                        puzzle_hash,
                        puzzle_hash_proof: self.finish_proof(set.is_included(&puzzle_hash).1),
                        coin_list_proof,
                    });
                    coins.push(PuzzleHashCoins {
                        puzzle_hash,
                        coins: group,
                    });
                }
                (coins, Some(proofs))
            }
        };

        Ok(AdditionsResponse::Respond(RespondAdditions {
            height: block.height,
            header_hash: block.header_hash,
            coins,
            proofs,
        }))
    }

    async fn request_removals(
        &self,
        request: RequestRemovals,
    ) -> Result<RemovalsResponse, WalletSyncError> {
        self.begin().await?;
        let chain = self.chain.read();
        let Some(block) = chain.tx_block(request.height, Some(request.header_hash)) else {
            return Ok(RemovalsResponse::Reject(RejectRemovalsRequest {
                height: request.height,
                header_hash: request.header_hash,
            }));
        };

        let removed: BTreeMap<Bytes32, Coin> = chain.removed[block.height as usize]
            .iter()
            .map(|coin| (coin.coin_id(), *coin))
            .collect();

        let (coins, proofs) = match request.coin_names {
            None => {
                let coins = removed
                    .iter()
                    .map(|(coin_id, coin)| RemovalEntry {
                        coin_id: *coin_id,
                        coin: Some(*coin),
                    })
                    .collect();
                (coins, None)
            }
            Some(names) => {
                let ids: Vec<Bytes32> = removed.keys().copied().collect();
                let set = MerkleSet::new(&ids);
                let coins = names
                    .iter()
                    .map(|coin_id| RemovalEntry {
                        coin_id: *coin_id,
                        coin: removed.get(coin_id).copied(),
                    })
                    .collect();
                let proofs = names
                    .iter()
                    .map(|coin_id| RemovalProof {
                        coin_id: *coin_id,
                        proof: self.finish_proof(set.is_included(coin_id).1),
                    })
                    .collect();
                (coins, Some(proofs))
            }
        };

        Ok(RemovalsResponse::Respond(RespondRemovals {
            height: block.height,
            header_hash: block.header_hash,
            coins,
            proofs,
        }))
    }

    async fn request_header_blocks(
        &self,
        request: RequestHeaderBlocks,
    ) -> Result<HeaderBlocksResponse, WalletSyncError> {
        self.begin().await?;
        self.header_requests.fetch_add(1, Ordering::SeqCst);
        let chain = self.chain.read();
        let (start, end) = (request.start_height, request.end_height);
        if end < start
            || end - start > MAX_BLOCK_COUNT_PER_REQUEST
            || end as usize >= chain.blocks.len()
        {
            return Ok(HeaderBlocksResponse::Reject(RejectHeaderBlocks {
                start_height: start,
                end_height: end,
            }));
        }
        Ok(HeaderBlocksResponse::Respond(RespondHeaderBlocks {
            start_height: start,
            end_height: end,
            header_blocks: chain.blocks[start as usize..=end as usize].to_vec(),
        }))
    }

    async fn request_ses_info(
        &self,
        request: RequestSesInfo,
    ) -> Result<RespondSesInfo, WalletSyncError> {
        self.begin().await?;
        let chain = self.chain.read();
        let heights: Vec<Height> = chain
            .blocks
            .iter()
            .map(|b| b.height)
            .filter(|h| (request.start_height..=request.end_height).contains(h))
            .collect();
        Ok(RespondSesInfo {
            reward_chain_hash: vec![chain.blocks[0].header_hash],
            heights: vec![heights],
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
