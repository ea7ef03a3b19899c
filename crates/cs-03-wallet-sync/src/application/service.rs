//! # Wallet Sync Service
//!
//! Drains the [`NewPeakQueue`] and keeps the wallet's coin store in line
//! with what connected full nodes can prove.
//!
//! Nothing a peer sends is trusted on its own. A coin state is accepted only
//! when the peer proves the coin's creation (and spend, if any) against the
//! additions and removals roots of blocks that link to the wallet's trusted
//! [`PeakChain`]. A peer that fails a proof, times out or serves headers
//! that do not link is closed and the next candidate is tried.
//!
//! Reorg updates are held to the same rule. The trusted chain only moves
//! back to where the peer's own headers leave it, and a retraction must come
//! with an exclusion proof from the coin's creation block. Changes the peer's
//! chain does not reach yet are left for the peak that moves the fork point.

use async_trait::async_trait;
use cs_01_merkle_set::{validate_additions, validate_removals};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use shared_types::{
    AdditionsResponse, Bytes32, Coin, CoinState, CoinStateUpdate, HeaderBlock,
    HeaderBlocksResponse, Height, NewPeakWallet, PeerId, PuzzleHashCoins, RegisterForCoinUpdates,
    RegisterForPhUpdates, RemovalsResponse, RequestAdditions, RequestHeaderBlocks,
    RequestRemovals, RequestSesInfo, RespondSesInfo,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::algorithms::{find_fork_point, validate_header_batch};
use crate::config::WalletSyncConfig;
use crate::domain::{
    can_use_peer_request_cache, NewPeakItem, NewPeakQueue, PeakChain, PeerRequestCache,
    SyncOutcome, WalletSyncError,
};
use crate::ports::{FullNodePeer, WalletCoinStore, WalletSyncApi};

/// Keys a subscription item asks a peer to follow.
#[derive(Clone, Copy)]
enum Subscription<'a> {
    CoinIds(&'a [Bytes32]),
    PuzzleHashes(&'a [Bytes32]),
}

#[derive(Debug, Default)]
struct BatchResult {
    applied: usize,
    rejected: usize,
    deferred: usize,
}

/// Height of the held change that `state` would undo: the creation for a
/// retraction, the spend for a state that drops it.
fn undone_height(held: &CoinState, state: &CoinState) -> Option<Height> {
    if state.is_retracted() {
        return held.created_height;
    }
    match (held.spent_height, state.spent_height) {
        (Some(spent), None) => Some(spent),
        _ => None,
    }
}

fn lists_coin(groups: &[PuzzleHashCoins], coin: &Coin) -> bool {
    groups
        .iter()
        .any(|group| group.puzzle_hash == coin.puzzle_hash && group.coins.contains(coin))
}

/// Run one peer call under a deadline.
async fn with_timeout<T>(
    peer: PeerId,
    timeout: Duration,
    call: impl Future<Output = Result<T, WalletSyncError>>,
) -> Result<T, WalletSyncError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| WalletSyncError::Timeout {
            peer,
            secs: timeout.as_secs(),
        })?
}

/// Fetch `start..=end` and check the batch is complete and linked.
async fn request_header_range<P: FullNodePeer>(
    peer: Arc<P>,
    start: Height,
    end: Height,
    timeout: Duration,
) -> Result<Vec<HeaderBlock>, WalletSyncError> {
    let id = peer.peer_id();
    let Some(span) = end.checked_sub(start) else {
        return Err(WalletSyncError::InvalidHeaderChain(format!(
            "inverted header range {start}..={end}"
        )));
    };
    let request = RequestHeaderBlocks {
        start_height: start,
        end_height: end,
    };
    match with_timeout(id, timeout, peer.request_header_blocks(request)).await? {
        HeaderBlocksResponse::Respond(response) => {
            let blocks = response.header_blocks;
            let expected = span as usize + 1;
            if blocks.len() != expected || blocks.first().map(|b| b.height) != Some(start) {
                return Err(WalletSyncError::InvalidHeaderChain(format!(
                    "peer {id} served {} blocks for {start}..={end}",
                    blocks.len()
                )));
            }
            validate_header_batch(&blocks)?;
            Ok(blocks)
        }
        HeaderBlocksResponse::Reject(_) => Err(WalletSyncError::PeerRejected {
            peer: id,
            reason: format!("header blocks {start}..={end}"),
        }),
    }
}

/// Wallet sync service - orchestrates queue, caches, trusted chain and peers.
pub struct WalletSyncService<P: FullNodePeer, W: WalletCoinStore> {
    /// Configuration.
    config: WalletSyncConfig,
    /// Work queue fed by network handlers.
    queue: Arc<NewPeakQueue>,
    /// Request caches.
    cache: Mutex<PeerRequestCache>,
    /// Trusted header chain.
    peak_chain: RwLock<PeakChain>,
    /// Connected full nodes, in candidate order.
    peers: RwLock<BTreeMap<PeerId, Arc<P>>>,
    /// Wallet coin store.
    store: Arc<W>,
}

impl<P, W> WalletSyncService<P, W>
where
    P: FullNodePeer + 'static,
    W: WalletCoinStore + 'static,
{
    /// Create a service trusting `anchor` as the start of the chain.
    pub fn new(config: WalletSyncConfig, anchor: HeaderBlock, store: Arc<W>) -> Result<Self, WalletSyncError> {
        config.validate()?;
        Ok(Self {
            cache: Mutex::new(PeerRequestCache::new(&config)),
            config,
            queue: Arc::new(NewPeakQueue::new()),
            peak_chain: RwLock::new(PeakChain::new(anchor)),
            peers: RwLock::new(BTreeMap::new()),
            store,
        })
    }

    /// The work queue.
    pub fn queue(&self) -> &Arc<NewPeakQueue> {
        &self.queue
    }

    /// The wallet coin store.
    pub fn store(&self) -> &Arc<W> {
        &self.store
    }

    /// Configuration.
    pub fn config(&self) -> &WalletSyncConfig {
        &self.config
    }

    /// Trusted peak.
    pub fn peak(&self) -> HeaderBlock {
        self.peak_chain.read().peak().clone()
    }

    /// Trusted header hash at `height`.
    pub fn trusted_hash_at(&self, height: Height) -> Option<Bytes32> {
        self.peak_chain.read().hash_at(height)
    }

    /// Add a connected full node.
    pub fn add_peer(&self, peer: Arc<P>) {
        let id = peer.peer_id();
        self.peers.write().insert(id, peer);
        tracing::debug!(peer_id = %id, "[cs-03] peer added");
    }

    /// Forget a peer without closing it.
    pub fn remove_peer(&self, peer: &PeerId) -> Option<Arc<P>> {
        self.peers.write().remove(peer)
    }

    /// Whether `peer` is connected.
    pub fn has_peer(&self, peer: &PeerId) -> bool {
        self.peers.read().contains_key(peer)
    }

    /// Connected peer ids.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.read().keys().copied().collect()
    }

    fn peer(&self, peer: &PeerId) -> Option<Arc<P>> {
        self.peers.read().get(peer).cloned()
    }

    fn candidates(&self) -> Vec<Arc<P>> {
        self.peers.read().values().cloned().collect()
    }

    /// Close a peer and stop using it.
    async fn drop_peer(&self, peer: &Arc<P>) {
        let id = peer.peer_id();
        peer.close().await;
        self.peers.write().remove(&id);
        tracing::warn!(peer_id = %id, "[cs-03] disconnected peer");
    }

    /// Dispatch one queue item.
    pub async fn process_item(&self, item: NewPeakItem) -> Result<SyncOutcome, WalletSyncError> {
        match item {
            NewPeakItem::CoinSubscription(ids) => {
                self.handle_subscription(Subscription::CoinIds(&ids)).await
            }
            NewPeakItem::PuzzleHashSubscription(phs) => {
                self.handle_subscription(Subscription::PuzzleHashes(&phs)).await
            }
            NewPeakItem::FullNodeStateUpdated { update, peer } => {
                self.handle_state_update(update, peer).await
            }
            NewPeakItem::NewPeakWallet { peak, peer } => self.handle_new_peak(peak, peer).await,
        }
    }

    async fn register_with(
        &self,
        peer: &Arc<P>,
        subscription: Subscription<'_>,
    ) -> Result<Vec<CoinState>, WalletSyncError> {
        let id = peer.peer_id();
        let timeout = self.config.request_timeout();
        match subscription {
            Subscription::CoinIds(ids) => {
                let request = RegisterForCoinUpdates {
                    coin_ids: ids.to_vec(),
                    min_height: 0,
                };
                let response = with_timeout(id, timeout, peer.register_for_coin_updates(request)).await?;
                Ok(response.coin_states)
            }
            Subscription::PuzzleHashes(phs) => {
                let request = RegisterForPhUpdates {
                    puzzle_hashes: phs.to_vec(),
                    min_height: 0,
                };
                let response = with_timeout(id, timeout, peer.register_for_ph_updates(request)).await?;
                Ok(response.coin_states)
            }
        }
    }

    async fn handle_subscription(&self, subscription: Subscription<'_>) -> Result<SyncOutcome, WalletSyncError> {
        for peer in self.candidates() {
            let id = peer.peer_id();
            let states = match self.register_with(&peer, subscription).await {
                Ok(states) => states,
                Err(e) if e.is_peer_failure() => {
                    tracing::warn!(peer_id = %id, "[cs-03] subscription failed: {}", e);
                    self.drop_peer(&peer).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let batch = self.apply_states(&peer, &states, None, None).await?;
            if batch.rejected > 0 && !self.has_peer(&id) {
                continue;
            }
            tracing::debug!(
                peer_id = %id,
                applied = batch.applied,
                "[cs-03] subscription acknowledged"
            );
            return Ok(SyncOutcome::Subscribed {
                peer: id,
                applied: batch.applied,
                rejected: batch.rejected,
            });
        }
        Err(WalletSyncError::NoPeersAvailable)
    }

    async fn handle_state_update(&self, update: CoinStateUpdate, peer_id: PeerId) -> Result<SyncOutcome, WalletSyncError> {
        let Some(peer) = self.peer(&peer_id) else {
            tracing::debug!(peer_id = %peer_id, "[cs-03] update from unknown peer ignored");
            return Ok(SyncOutcome::Ignored);
        };

        let fork_height = update.is_reorg().then_some(update.fork_height);
        let mut rolled_back_to = None;
        if fork_height.is_some() {
            match self.verify_reorg(&peer, &update).await {
                Ok(fork) => rolled_back_to = fork,
                Err(e) if e.is_peer_failure() => {
                    tracing::warn!(peer_id = %peer_id, "[cs-03] reorg did not check out: {}", e);
                    self.drop_peer(&peer).await;
                    return Ok(SyncOutcome::PeerDropped { peer: peer_id });
                }
                Err(e) => return Err(e),
            }
        }

        let reach = fork_height.map(|_| update.height);
        let batch = self.apply_states(&peer, &update.items, fork_height, reach).await?;
        if batch.rejected > 0 && !self.has_peer(&peer_id) {
            return Ok(SyncOutcome::PeerDropped { peer: peer_id });
        }
        if batch.deferred > 0 {
            tracing::debug!(
                peer_id = %peer_id,
                deferred = batch.deferred,
                "[cs-03] changes above the peer's chain wait for its next peak"
            );
        }
        Ok(SyncOutcome::StatesApplied {
            peer: peer_id,
            applied: batch.applied,
            rejected: batch.rejected,
            rolled_back_to,
        })
    }

    /// Roll back to where `peer`'s headers leave the trusted chain, if they
    /// do at or below the height the update reports.
    ///
    /// The claimed fork height alone never moves the trusted chain.
    async fn verify_reorg(&self, peer: &Arc<P>, update: &CoinStateUpdate) -> Result<Option<Height>, WalletSyncError> {
        let (local_height, anchor) = {
            let chain = self.peak_chain.read();
            (chain.height(), chain.anchor_height())
        };
        let probe = local_height.min(update.height);
        if update.fork_height >= probe || probe < anchor {
            return Ok(None);
        }
        let fork = self.find_fork_with(peer, probe).await?;
        if fork >= probe {
            tracing::debug!(
                peer_id = %peer.peer_id(),
                claimed = update.fork_height,
                "[cs-03] peer still agrees with the trusted chain at {}",
                probe
            );
            return Ok(None);
        }
        self.rollback(fork).await?;
        Ok(Some(fork))
    }

    async fn handle_new_peak(&self, peak: NewPeakWallet, peer_id: PeerId) -> Result<SyncOutcome, WalletSyncError> {
        let Some(peer) = self.peer(&peer_id) else {
            return Ok(SyncOutcome::Ignored);
        };
        let (local_height, local_weight, known) = {
            let chain = self.peak_chain.read();
            (
                chain.height(),
                chain.peak().weight,
                chain.hash_at(peak.height) == Some(peak.header_hash),
            )
        };
        if known || peak.weight <= local_weight {
            return Ok(SyncOutcome::Ignored);
        }

        match self.follow_peak(&peer, &peak, local_height).await {
            Ok(()) => {
                tracing::info!(peer_id = %peer_id, height = peak.height, "[cs-03] synced to new peak");
                Ok(SyncOutcome::PeakSynced {
                    peer: peer_id,
                    height: peak.height,
                })
            }
            Err(e) if e.is_peer_failure() => {
                tracing::warn!(peer_id = %peer_id, "[cs-03] failed to follow peak: {}", e);
                self.drop_peer(&peer).await;
                Ok(SyncOutcome::PeerDropped { peer: peer_id })
            }
            Err(e) => Err(e),
        }
    }

    async fn follow_peak(&self, peer: &Arc<P>, peak: &NewPeakWallet, local_height: Height) -> Result<(), WalletSyncError> {
        if peak.fork_point_with_previous_peak < local_height || peak.height <= local_height {
            let fork = self.find_fork_with(peer, local_height.min(peak.height)).await?;
            if fork < local_height {
                self.rollback(fork).await?;
            }
        }
        self.sync_headers_to(peer, peak.height).await?;

        let hash = self.peak_chain.read().hash_at(peak.height);
        if hash != Some(peak.header_hash) {
            return Err(WalletSyncError::PeakMismatch {
                height: peak.height,
                expected: peak.header_hash,
            });
        }
        Ok(())
    }

    /// Undo everything above `fork`: trusted chain, caches and coin store.
    async fn rollback(&self, fork: Height) -> Result<(), WalletSyncError> {
        let removed_blocks = self.peak_chain.write().rollback_to(fork);
        self.cache.lock().clear_after_height(fork);
        let touched = self.store.rollback_to(fork).await?;
        tracing::info!(
            fork_height = fork,
            removed_blocks,
            touched,
            "[cs-03] rolled back"
        );
        Ok(())
    }

    async fn apply_states(
        &self,
        peer: &Arc<P>,
        states: &[CoinState],
        fork_height: Option<Height>,
        reach: Option<Height>,
    ) -> Result<BatchResult, WalletSyncError> {
        let mut result = BatchResult::default();
        for (index, state) in states.iter().enumerate() {
            let coin_id = state.coin.coin_id();
            let held = self.store.get_coin_state(&coin_id).await?;
            if let (Some(reach), Some(held)) = (reach, held.as_ref()) {
                if undone_height(held, state).is_some_and(|h| h > reach) {
                    result.deferred += 1;
                    continue;
                }
            }

            let valid = if state.is_retracted() {
                let Some(held) = held else {
                    continue;
                };
                self.validate_retraction(&held, peer).await?
            } else {
                self.validate_received_state(state, peer, fork_height).await?
            };
            if valid {
                if state.is_retracted() {
                    self.store.remove_coin(&coin_id).await?;
                } else {
                    self.store.apply_state(*state).await?;
                }
                result.applied += 1;
            } else {
                result.rejected += 1;
                if !self.has_peer(&peer.peer_id()) {
                    result.rejected += states.len() - index - 1;
                    break;
                }
            }
        }
        Ok(result)
    }

    /// Check a coin state received from `peer`.
    ///
    /// Returns `Ok(false)` when the state cannot be proven; the peer is then
    /// closed. `fork_height` is set while a reorg is being applied and keeps
    /// states above the fork point from being served out of the cache.
    pub async fn validate_received_state(
        &self,
        state: &CoinState,
        peer: &Arc<P>,
        fork_height: Option<Height>,
    ) -> Result<bool, WalletSyncError> {
        let cached = {
            let mut cache = self.cache.lock();
            can_use_peer_request_cache(state, &mut cache, fork_height)
        };
        if cached {
            return Ok(true);
        }

        let current = self.store.get_coin_state(&state.coin.coin_id()).await?;
        if current.as_ref() == Some(state) {
            self.cache.lock().add_to_states_validated(state);
            return Ok(true);
        }
        let Some(created_height) = state.created_height else {
            return Ok(false);
        };

        let proof = self.prove_state(peer, state, current, created_height).await;
        let valid = self.settle(peer, &state.coin, proof).await?;
        if valid {
            self.cache.lock().add_to_states_validated(state);
        }
        Ok(valid)
    }

    /// Check a retraction of the `held` state. The creation block on the
    /// trusted chain must provably exclude the coin.
    async fn validate_retraction(&self, held: &CoinState, peer: &Arc<P>) -> Result<bool, WalletSyncError> {
        let Some(created_height) = held.created_height else {
            return Ok(true);
        };
        let proof = self.prove_retraction(peer, &held.coin, created_height).await;
        self.settle(peer, &held.coin, proof).await
    }

    async fn prove_retraction(&self, peer: &Arc<P>, coin: &Coin, created_height: Height) -> Result<bool, WalletSyncError> {
        let block = self.header_block_at(peer, created_height).await?;
        Ok(self.validate_block_inclusion(peer, &block).await?
            && self.additions_exclude(peer, &block, coin).await?)
    }

    /// Close `peer` when a proof it owed did not hold.
    async fn settle(
        &self,
        peer: &Arc<P>,
        coin: &Coin,
        proof: Result<bool, WalletSyncError>,
    ) -> Result<bool, WalletSyncError> {
        match proof {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::warn!(
                    peer_id = %peer.peer_id(),
                    coin_id = %coin.coin_id(),
                    "[cs-03] state failed validation"
                );
                self.drop_peer(peer).await;
                Ok(false)
            }
            Err(e) if e.is_peer_failure() => {
                tracing::warn!(peer_id = %peer.peer_id(), "[cs-03] validation aborted: {}", e);
                self.drop_peer(peer).await;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn prove_state(
        &self,
        peer: &Arc<P>,
        state: &CoinState,
        current: Option<CoinState>,
        created_height: Height,
    ) -> Result<bool, WalletSyncError> {
        let coin_id = state.coin.coin_id();

        let created_block = self.header_block_at(peer, created_height).await?;
        if !self.additions_include(peer, &created_block, &state.coin).await?
            || !self.validate_block_inclusion(peer, &created_block).await?
        {
            return Ok(false);
        }

        // The peer says unspent but the wallet saw a spend: the old spend
        // block must prove the coin absent.
        if state.spent_height.is_none() {
            if let Some(previous_spend) = current.and_then(|c| c.spent_height) {
                let block = self.header_block_at(peer, previous_spend).await?;
                if !self.removals_match(peer, &block, &coin_id, false).await?
                    || !self.validate_block_inclusion(peer, &block).await?
                {
                    return Ok(false);
                }
            }
        }

        if let Some(spent_height) = state.spent_height {
            let block = self.header_block_at(peer, spent_height).await?;
            if !self.removals_match(peer, &block, &coin_id, true).await?
                || !self.validate_block_inclusion(peer, &block).await?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Header block at `height`: trusted chain, then cache, then `peer`.
    async fn header_block_at(&self, peer: &Arc<P>, height: Height) -> Result<HeaderBlock, WalletSyncError> {
        let trusted = self.peak_chain.read().block_at(height).cloned();
        if let Some(block) = trusted {
            return Ok(block);
        }
        let cached = self.cache.lock().get_block(height);
        if let Some(block) = cached {
            return Ok(block);
        }
        let blocks = self.fetch_header_blocks(peer, height, height).await?;
        blocks.into_iter().next().ok_or_else(|| {
            WalletSyncError::InvalidHeaderChain(format!("no block at height {height}"))
        })
    }

    /// Additions under `puzzle_hash` in `block`, as proven by `peer`.
    /// `None` if the proof does not hold.
    async fn proven_additions(
        &self,
        peer: &Arc<P>,
        block: &HeaderBlock,
        puzzle_hash: Bytes32,
    ) -> Result<Option<Vec<PuzzleHashCoins>>, WalletSyncError> {
        let Some(info) = block.transactions_info else {
            return Ok(Some(Vec::new()));
        };
        let request = RequestAdditions {
            height: block.height,
            header_hash: Some(block.header_hash),
            puzzle_hashes: Some(vec![puzzle_hash]),
        };
        let response = with_timeout(peer.peer_id(), self.config.request_timeout(), peer.request_additions(request)).await?;
        let AdditionsResponse::Respond(response) = response else {
            return Ok(None);
        };
        let Some(proofs) = response.proofs.as_deref() else {
            return Ok(None);
        };
        if !validate_additions(&response.coins, Some(proofs), &info.additions_root) {
            return Ok(None);
        }
        Ok(Some(response.coins))
    }

    async fn additions_include(&self, peer: &Arc<P>, block: &HeaderBlock, coin: &Coin) -> Result<bool, WalletSyncError> {
        let groups = self.proven_additions(peer, block, coin.puzzle_hash).await?;
        Ok(groups.is_some_and(|groups| lists_coin(&groups, coin)))
    }

    async fn additions_exclude(&self, peer: &Arc<P>, block: &HeaderBlock, coin: &Coin) -> Result<bool, WalletSyncError> {
        let groups = self.proven_additions(peer, block, coin.puzzle_hash).await?;
        Ok(groups.is_some_and(|groups| !lists_coin(&groups, coin)))
    }

    /// Whether `block`'s removals provably do (`spent`) or do not list `coin_id`.
    async fn removals_match(
        &self,
        peer: &Arc<P>,
        block: &HeaderBlock,
        coin_id: &Bytes32,
        spent: bool,
    ) -> Result<bool, WalletSyncError> {
        let Some(info) = block.transactions_info else {
            return Ok(!spent);
        };
        let request = RequestRemovals {
            height: block.height,
            header_hash: block.header_hash,
            coin_names: Some(vec![*coin_id]),
        };
        let response = with_timeout(peer.peer_id(), self.config.request_timeout(), peer.request_removals(request)).await?;
        let RemovalsResponse::Respond(response) = response else {
            return Ok(false);
        };
        let Some(proofs) = response.proofs.as_deref() else {
            return Ok(false);
        };
        if !validate_removals(&response.coins, Some(proofs), &info.removals_root) {
            return Ok(false);
        }
        let listed = response
            .coins
            .iter()
            .any(|entry| entry.coin_id == *coin_id && entry.coin.is_some());
        Ok(listed == spent)
    }

    /// Whether `block` is on the trusted chain, extending the chain from
    /// `peer` if the block is above the current peak.
    async fn validate_block_inclusion(&self, peer: &Arc<P>, block: &HeaderBlock) -> Result<bool, WalletSyncError> {
        let validated = self.cache.lock().in_blocks_validated(&block.header_hash);
        if validated {
            return Ok(true);
        }
        if block.height > self.peak_height() {
            self.sync_headers_to(peer, block.height).await?;
        }
        let included = self.peak_chain.read().contains(block);
        if included {
            self.cache
                .lock()
                .add_to_blocks_validated(block.header_hash, block.height);
        }
        Ok(included)
    }

    /// Extend the trusted chain from `peer` until it reaches `target`.
    async fn sync_headers_to(&self, peer: &Arc<P>, target: Height) -> Result<(), WalletSyncError> {
        loop {
            let peak = self.peak();
            if peak.height >= target {
                return Ok(());
            }
            let start = peak.height + 1;
            let end = target.min(start + self.config.max_header_batch - 1);
            let blocks = self.fetch_header_blocks(peer, start, end).await?;

            if blocks.first().map(|b| b.prev_header_hash) != Some(peak.header_hash) {
                let fork = self.find_fork_with(peer, peak.height).await?;
                if fork >= peak.height {
                    return Err(WalletSyncError::InvalidHeaderChain(format!(
                        "block {start} from peer {} does not link to {}",
                        peer.peer_id(),
                        peak.header_hash
                    )));
                }
                self.rollback(fork).await?;
                continue;
            }

            {
                let mut chain = self.peak_chain.write();
                for block in blocks {
                    chain.append(block)?;
                }
            }
        }
    }

    /// Highest height at or below `from` where `peer` agrees with the
    /// trusted chain.
    async fn find_fork_with(&self, peer: &Arc<P>, from: Height) -> Result<Height, WalletSyncError> {
        let anchor = self.peak_chain.read().anchor_height();
        if from < anchor {
            return Err(WalletSyncError::InvalidHeaderChain(format!(
                "peer {} forks below the anchor at {}",
                peer.peer_id(),
                anchor
            )));
        }
        let mut end = from;
        loop {
            let start = end
                .saturating_sub(self.config.max_header_batch - 1)
                .max(anchor);
            let remote = self.fetch_header_blocks(peer, start, end).await?;
            let fork = find_fork_point(&self.peak_chain.read(), &remote);
            if let Some(fork) = fork {
                return Ok(fork);
            }
            if start <= anchor {
                return Err(WalletSyncError::InvalidHeaderChain(format!(
                    "peer {} does not share the anchor block",
                    peer.peer_id()
                )));
            }
            end = start - 1;
        }
    }

    /// Fetch `start..=end`, sharing one round trip between concurrent
    /// callers. A failed request is evicted so the next caller retries.
    async fn fetch_header_blocks(
        &self,
        peer: &Arc<P>,
        start: Height,
        end: Height,
    ) -> Result<Vec<HeaderBlock>, WalletSyncError> {
        let request = {
            let mut cache = self.cache.lock();
            match cache.get_block_request(start, end) {
                Some(request) => request,
                None => {
                    let request = request_header_range(peer.clone(), start, end, self.config.request_timeout())
                        .boxed()
                        .shared();
                    cache.add_to_block_requests(start, end, request.clone());
                    request
                }
            }
        };

        let result = request.await;
        let mut cache = self.cache.lock();
        match &result {
            Ok(blocks) => {
                for block in blocks {
                    cache.add_to_blocks(block.clone());
                }
            }
            Err(e) => {
                cache.remove_block_request(start, end);
                tracing::debug!("[cs-03] header request {}..={} failed: {}", start, end, e);
            }
        }
        result
    }

    /// Sub-epoch summaries from `height`, cached.
    pub async fn ses_info(&self, peer_id: PeerId, height: Height) -> Result<RespondSesInfo, WalletSyncError> {
        let cached = self.cache.lock().get_ses_request(height);
        if let Some(response) = cached {
            return Ok(response);
        }
        let peer = self.peer(&peer_id).ok_or(WalletSyncError::UnknownPeer(peer_id))?;
        let request = RequestSesInfo {
            start_height: height,
            end_height: self.peak_height().max(height),
        };
        let response = with_timeout(peer_id, self.config.request_timeout(), peer.request_ses_info(request)).await?;
        self.cache.lock().add_to_ses_requests(height, response.clone());
        Ok(response)
    }

    /// Timestamp of the block at `height`; `None` if it is not a
    /// transaction block.
    pub async fn timestamp_for_height(&self, height: Height) -> Result<Option<u64>, WalletSyncError> {
        let cached = self.cache.lock().get_height_timestamp(height);
        if cached.is_some() {
            return Ok(cached);
        }
        let trusted = self.peak_chain.read().block_at(height).cloned();
        if let Some(block) = trusted {
            return Ok(block.timestamp());
        }
        for peer in self.candidates() {
            match self.fetch_header_blocks(&peer, height, height).await {
                Ok(blocks) => return Ok(blocks.first().and_then(HeaderBlock::timestamp)),
                Err(e) if e.is_peer_failure() => self.drop_peer(&peer).await,
                Err(e) => return Err(e),
            }
        }
        Err(WalletSyncError::NoPeersAvailable)
    }
}

#[async_trait]
impl<P, W> WalletSyncApi for WalletSyncService<P, W>
where
    P: FullNodePeer + 'static,
    W: WalletCoinStore + 'static,
{
    fn subscribe_to_puzzle_hashes(&self, puzzle_hashes: Vec<Bytes32>) {
        self.queue.subscribe_to_puzzle_hashes(puzzle_hashes);
    }

    fn subscribe_to_coin_ids(&self, coin_ids: Vec<Bytes32>) {
        self.queue.subscribe_to_coin_ids(coin_ids);
    }

    fn on_coin_state_update(&self, update: CoinStateUpdate, peer: PeerId) {
        self.queue.full_node_state_updated(update, peer);
    }

    fn on_new_peak(&self, peak: NewPeakWallet, peer: PeerId) {
        self.queue.new_peak_wallet(peak, peer);
    }

    async fn process_next(&self) -> Result<SyncOutcome, WalletSyncError> {
        let item = self.queue.get().await;
        self.process_item(item).await
    }

    async fn process_pending(&self) -> Result<Vec<SyncOutcome>, WalletSyncError> {
        let mut outcomes = Vec::new();
        while let Some(item) = self.queue.try_get() {
            outcomes.push(self.process_item(item).await?);
        }
        Ok(outcomes)
    }

    fn peak_height(&self) -> Height {
        self.peak_chain.read().height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryWalletStore;
    use crate::ports::MockFullNodePeer;

    type Service = WalletSyncService<MockFullNodePeer, InMemoryWalletStore>;

    fn key(n: u8) -> Bytes32 {
        Bytes32([n; 32])
    }

    fn coin(n: u8, puzzle_hash: Bytes32) -> Coin {
        Coin::new(key(n), puzzle_hash, n as u64 * 10)
    }

    fn setup(peer_ids: &[u8]) -> (Service, Vec<Arc<MockFullNodePeer>>) {
        let service = WalletSyncService::new(
            WalletSyncConfig::for_testing(),
            MockFullNodePeer::genesis(),
            Arc::new(InMemoryWalletStore::new()),
        )
        .unwrap();
        let peers: Vec<Arc<MockFullNodePeer>> = peer_ids
            .iter()
            .map(|n| Arc::new(MockFullNodePeer::new(key(*n))))
            .collect();
        for peer in &peers {
            service.add_peer(peer.clone());
        }
        (service, peers)
    }

    fn announce(block: &HeaderBlock, fork_point: Height) -> NewPeakWallet {
        NewPeakWallet {
            header_hash: block.header_hash,
            height: block.height,
            weight: block.weight,
            fork_point_with_previous_peak: fork_point,
        }
    }

    #[tokio::test]
    async fn test_subscription_applies_proven_states() {
        let (service, peers) = setup(&[1]);
        let ph = key(50);
        let created = coin(1, ph);
        let spent = coin(2, ph);
        peers[0].push_block(&[created, spent], &[]);
        peers[0].push_block(&[], &[spent]);

        service.subscribe_to_puzzle_hashes(vec![ph]);
        let outcomes = service.process_pending().await.unwrap();
        assert_eq!(
            outcomes,
            vec![SyncOutcome::Subscribed {
                peer: key(1),
                applied: 2,
                rejected: 0,
            }]
        );

        let states = service.store().coin_states().await.unwrap();
        assert!(states.contains(&CoinState::new(created, Some(1), None)));
        assert!(states.contains(&CoinState::new(spent, Some(1), Some(2))));
        assert_eq!(service.peak_height(), 2);
        assert_eq!(service.trusted_hash_at(2), Some(peers[0].peak().header_hash));
        assert!(!service.queue().has_pending_data_process_items());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_next_peer() {
        let (service, peers) = setup(&[1, 2]);
        let ph = key(50);
        for peer in &peers {
            peer.push_block(&[coin(1, ph)], &[]);
        }
        peers[0].set_stalled(true);

        service.subscribe_to_coin_ids(vec![coin(1, ph).coin_id()]);
        let outcome = service.process_next().await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Subscribed {
                peer: key(2),
                applied: 1,
                rejected: 0,
            }
        );
        assert!(peers[0].is_closed());
        assert_eq!(service.peer_ids(), vec![key(2)]);
    }

    #[tokio::test]
    async fn test_lying_peer_is_closed() {
        let (service, peers) = setup(&[1]);
        let ph = key(50);
        peers[0].push_block(&[coin(1, ph)], &[]);
        peers[0].set_tampering(true);

        service.subscribe_to_puzzle_hashes(vec![ph]);
        let result = service.process_pending().await;
        assert_eq!(result, Err(WalletSyncError::NoPeersAvailable));
        assert!(peers[0].is_closed());
        assert!(service.store().is_empty());
    }

    #[tokio::test]
    async fn test_lying_peer_falls_back_to_honest_one() {
        let (service, peers) = setup(&[1, 2]);
        let ph = key(50);
        for peer in &peers {
            peer.push_block(&[coin(1, ph)], &[]);
        }
        peers[0].set_tampering(true);

        service.subscribe_to_puzzle_hashes(vec![ph]);
        let outcome = service.process_next().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Subscribed { peer, applied: 1, .. } if peer == key(2)));
        assert!(peers[0].is_closed());
    }

    #[tokio::test]
    async fn test_reorg_update_rolls_back_then_new_peak_resyncs() {
        let (service, peers) = setup(&[1]);
        let peer = &peers[0];
        let ph = key(50);
        let survivor = coin(1, ph);
        let orphaned = coin(2, ph);
        peer.push_block(&[survivor], &[]);
        peer.push_block(&[orphaned], &[]);

        service.subscribe_to_puzzle_hashes(vec![ph]);
        service.process_pending().await.unwrap();
        assert_eq!(service.store().len(), 2);
        let old_tip = service.trusted_hash_at(2);

        peer.rollback_to(1);
        let new_tip = peer.push_block(&[], &[]);
        service.on_coin_state_update(
            CoinStateUpdate {
                height: 2,
                fork_height: 1,
                peak_hash: new_tip.header_hash,
                items: vec![CoinState::retracted(orphaned)],
            },
            key(1),
        );
        service.on_new_peak(announce(&new_tip, 1), key(1));

        let outcomes = service.process_pending().await.unwrap();
        assert_eq!(
            outcomes,
            vec![
                SyncOutcome::StatesApplied {
                    peer: key(1),
                    applied: 0,
                    rejected: 0,
                    rolled_back_to: Some(1),
                },
                SyncOutcome::PeakSynced {
                    peer: key(1),
                    height: 2,
                },
            ]
        );
        assert_eq!(
            service.store().coin_states().await.unwrap(),
            vec![CoinState::new(survivor, Some(1), None)]
        );
        assert_ne!(service.trusted_hash_at(2), old_tip);
        assert_eq!(service.trusted_hash_at(2), Some(new_tip.header_hash));
    }

    #[tokio::test]
    async fn test_retraction_on_unchanged_chain_closes_peer() {
        let (service, peers) = setup(&[1]);
        let ph = key(50);
        peers[0].push_block(&[coin(1, ph)], &[]);
        let claimed = coin(2, ph);
        let tip = peers[0].push_block(&[claimed], &[]);

        service.subscribe_to_puzzle_hashes(vec![ph]);
        service.process_pending().await.unwrap();
        assert_eq!(service.store().len(), 2);

        service.on_coin_state_update(
            CoinStateUpdate {
                height: 2,
                fork_height: 0,
                peak_hash: tip.header_hash,
                items: vec![CoinState::retracted(claimed)],
            },
            key(1),
        );
        assert_eq!(
            service.process_next().await.unwrap(),
            SyncOutcome::PeerDropped { peer: key(1) }
        );
        assert!(peers[0].is_closed());
        assert_eq!(service.store().len(), 2);
        assert_eq!(service.peak_height(), 2);
        assert_eq!(service.trusted_hash_at(2), Some(tip.header_hash));
    }

    #[tokio::test]
    async fn test_claimed_fork_without_divergence_keeps_spend() {
        let (service, peers) = setup(&[1]);
        let ph = key(50);
        let spent = coin(1, ph);
        peers[0].push_block(&[spent], &[]);
        let tip = peers[0].push_block(&[], &[spent]);

        service.subscribe_to_puzzle_hashes(vec![ph]);
        service.process_pending().await.unwrap();
        let held = CoinState::new(spent, Some(1), Some(2));
        assert_eq!(service.store().coin_states().await.unwrap(), vec![held]);

        service.on_coin_state_update(
            CoinStateUpdate {
                height: 2,
                fork_height: 1,
                peak_hash: tip.header_hash,
                items: vec![CoinState::new(spent, Some(1), None)],
            },
            key(1),
        );
        assert_eq!(
            service.process_next().await.unwrap(),
            SyncOutcome::PeerDropped { peer: key(1) }
        );
        assert!(peers[0].is_closed());
        assert_eq!(service.store().coin_states().await.unwrap(), vec![held]);
        assert_eq!(service.trusted_hash_at(2), Some(tip.header_hash));
    }

    #[tokio::test]
    async fn test_retraction_above_peer_chain_waits_for_peak() {
        let (service, peers) = setup(&[1]);
        let peer = &peers[0];
        let ph = key(50);
        let survivor = coin(1, ph);
        let orphaned = coin(2, ph);
        peer.push_block(&[survivor], &[]);
        peer.push_block(&[orphaned], &[]);

        service.subscribe_to_puzzle_hashes(vec![ph]);
        service.process_pending().await.unwrap();

        peer.rollback_to(1);
        service.on_coin_state_update(
            CoinStateUpdate {
                height: 1,
                fork_height: 1,
                peak_hash: peer.peak().header_hash,
                items: vec![CoinState::retracted(orphaned)],
            },
            key(1),
        );
        assert_eq!(
            service.process_next().await.unwrap(),
            SyncOutcome::StatesApplied {
                peer: key(1),
                applied: 0,
                rejected: 0,
                rolled_back_to: None,
            }
        );
        assert_eq!(service.store().len(), 2);
        assert!(!peer.is_closed());

        peer.push_block(&[], &[]);
        let new_tip = peer.push_block(&[], &[]);
        service.on_new_peak(announce(&new_tip, 1), key(1));
        assert_eq!(
            service.process_next().await.unwrap(),
            SyncOutcome::PeakSynced {
                peer: key(1),
                height: 3,
            }
        );
        assert_eq!(
            service.store().coin_states().await.unwrap(),
            vec![CoinState::new(survivor, Some(1), None)]
        );
        assert_eq!(service.trusted_hash_at(3), Some(new_tip.header_hash));
    }

    #[tokio::test]
    async fn test_peak_below_anchor_drops_peer() {
        let peer = Arc::new(MockFullNodePeer::new(key(1)));
        for _ in 0..3 {
            peer.push_block(&[], &[]);
        }
        let service: Service = WalletSyncService::new(
            WalletSyncConfig::for_testing(),
            peer.block_at(3).unwrap(),
            Arc::new(InMemoryWalletStore::new()),
        )
        .unwrap();
        service.add_peer(peer.clone());

        service.on_new_peak(
            NewPeakWallet {
                header_hash: key(77),
                height: 1,
                weight: 1_000_000,
                fork_point_with_previous_peak: 0,
            },
            key(1),
        );
        assert_eq!(
            service.process_next().await.unwrap(),
            SyncOutcome::PeerDropped { peer: key(1) }
        );
        assert_eq!(peer.header_requests(), 0);
        assert_eq!(service.peak_height(), 3);
    }

    #[tokio::test]
    async fn test_inverted_header_range_is_not_sent() {
        let (_service, peers) = setup(&[1]);
        for _ in 0..3 {
            peers[0].push_block(&[], &[]);
        }
        let result = request_header_range(peers[0].clone(), 3, 1, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(WalletSyncError::InvalidHeaderChain(_))));
        assert_eq!(peers[0].header_requests(), 0);
    }

    #[tokio::test]
    async fn test_new_peak_syncs_in_batches() {
        let (service, peers) = setup(&[1]);
        for _ in 0..10 {
            peers[0].push_block(&[], &[]);
        }
        service.on_new_peak(announce(&peers[0].peak(), 9), key(1));
        let outcome = service.process_next().await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::PeakSynced {
                peer: key(1),
                height: 10,
            }
        );
        assert_eq!(peers[0].header_requests(), 3);

        service.on_new_peak(announce(&peers[0].peak(), 9), key(1));
        assert_eq!(service.process_next().await.unwrap(), SyncOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_peak_mismatch_drops_peer() {
        let (service, peers) = setup(&[1]);
        let block = peers[0].push_block(&[], &[]);
        let mut forged = announce(&block, 0);
        forged.header_hash = key(99);

        service.on_new_peak(forged, key(1));
        assert_eq!(
            service.process_next().await.unwrap(),
            SyncOutcome::PeerDropped { peer: key(1) }
        );
        assert!(peers[0].is_closed());
    }

    #[tokio::test]
    async fn test_update_from_unknown_peer_is_ignored() {
        let (service, _peers) = setup(&[1]);
        service.on_coin_state_update(
            CoinStateUpdate {
                height: 1,
                fork_height: 0,
                peak_hash: key(9),
                items: Vec::new(),
            },
            key(7),
        );
        assert_eq!(service.process_next().await.unwrap(), SyncOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_concurrent_header_requests_share_one_round_trip() {
        let (service, peers) = setup(&[1]);
        for _ in 0..3 {
            peers[0].push_block(&[], &[]);
        }
        let (a, b) = futures::join!(
            service.fetch_header_blocks(&peers[0], 1, 3),
            service.fetch_header_blocks(&peers[0], 1, 3)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(peers[0].header_requests(), 1);
    }

    #[tokio::test]
    async fn test_failed_header_request_is_evicted() {
        let (service, peers) = setup(&[1]);
        peers[0].push_block(&[], &[]);
        peers[0].set_failing(true);
        assert!(service.fetch_header_blocks(&peers[0], 1, 1).await.is_err());

        peers[0].set_failing(false);
        assert!(service.fetch_header_blocks(&peers[0], 1, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_validated_state_served_from_cache() {
        let (service, peers) = setup(&[1]);
        let state_coin = coin(1, key(50));
        peers[0].push_block(&[state_coin], &[]);
        let state = CoinState::new(state_coin, Some(1), None);

        assert!(service.validate_received_state(&state, &peers[0], None).await.unwrap());
        peers[0].set_failing(true);
        assert!(service.validate_received_state(&state, &peers[0], None).await.unwrap());
        assert!(!peers[0].is_closed());
    }

    #[tokio::test]
    async fn test_claimed_spend_without_proof_is_rejected() {
        let (service, peers) = setup(&[1]);
        let unspent = coin(1, key(50));
        peers[0].push_block(&[unspent], &[]);
        peers[0].push_block(&[], &[]);

        let lie = CoinState::new(unspent, Some(1), Some(2));
        assert!(!service.validate_received_state(&lie, &peers[0], None).await.unwrap());
        assert!(peers[0].is_closed());
    }

    #[tokio::test]
    async fn test_ses_info_is_cached() {
        let (service, peers) = setup(&[1]);
        let first = service.ses_info(key(1), 0).await.unwrap();
        peers[0].set_failing(true);
        assert_eq!(service.ses_info(key(1), 0).await.unwrap(), first);
        assert_eq!(
            service.ses_info(key(9), 5).await,
            Err(WalletSyncError::UnknownPeer(key(9)))
        );
    }

    #[tokio::test]
    async fn test_timestamp_for_height() {
        let (service, peers) = setup(&[1]);
        peers[0].push_block(&[], &[]);
        assert_eq!(service.timestamp_for_height(0).await.unwrap(), None);
        assert_eq!(service.timestamp_for_height(1).await.unwrap(), Some(1_001));
        peers[0].set_failing(true);
        assert_eq!(service.timestamp_for_height(1).await.unwrap(), Some(1_001));
    }
}
