//! # Wallet Protocol Service
//!
//! Full-node side of the wallet protocol: registrations with backfill,
//! additions/removals with proofs, header block ranges, and peer
//! disconnects. Chain events are forwarded to the notifier.

use async_trait::async_trait;
use cs_01_merkle_set::{additions_leaves, hash_coin_ids, MerkleSet};
use parking_lot::RwLock;
use shared_types::{
    AdditionProof, AdditionsResponse, Bytes32, Coin, CoinState, HeaderBlock, HeaderBlocksResponse,
    Height, PeerId, PuzzleHashCoins, RegisterForCoinUpdates, RegisterForPhUpdates,
    RejectAdditionsRequest, RejectHeaderBlocks, RejectRemovalsRequest, RemovalEntry,
    RemovalProof, RemovalsResponse, RequestAdditions, RequestHeaderBlocks, RequestRemovals,
    RespondAdditions, RespondHeaderBlocks, RespondRemovals, RespondToCoinUpdates,
    RespondToPhUpdates, MAX_BLOCK_COUNT_PER_REQUEST,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::application::notifier::CoinStateNotifier;
use crate::config::SubscriptionConfig;
use crate::domain::{BlockAdded, ChainReorged, SubscriptionError, SubscriptionKind, SubscriptionRegistry};
use crate::metrics::NotifierMetrics;
use crate::ports::{BlockStore, CoinStore, PeerOutbound, WalletProtocolApi};

/// Wallet protocol service - orchestrates registry, stores and notifier.
pub struct WalletProtocolService<S, O>
where
    S: CoinStore + BlockStore,
    O: PeerOutbound,
{
    /// Configuration (trusted peers may change at runtime).
    config: RwLock<SubscriptionConfig>,
    /// Shared with the notifier.
    registry: Arc<RwLock<SubscriptionRegistry>>,
    /// Coin and block store.
    store: Arc<S>,
    /// Coin state fan-out.
    notifier: CoinStateNotifier<O>,
    /// Counters.
    metrics: Arc<NotifierMetrics>,
}

impl<S, O> WalletProtocolService<S, O>
where
    S: CoinStore + BlockStore,
    O: PeerOutbound,
{
    /// Create a new service.
    pub fn new(config: SubscriptionConfig, store: Arc<S>, outbound: Arc<O>) -> Result<Self, SubscriptionError> {
        config.validate()?;
        let registry = Arc::new(RwLock::new(SubscriptionRegistry::new()));
        let metrics = Arc::new(NotifierMetrics::new());
        let notifier = CoinStateNotifier::new(registry.clone(), outbound, metrics.clone());
        Ok(Self {
            config: RwLock::new(config),
            registry,
            store,
            notifier,
            metrics,
        })
    }

    /// The subscription registry.
    pub fn registry(&self) -> &Arc<RwLock<SubscriptionRegistry>> {
        &self.registry
    }

    /// Counters.
    pub fn metrics(&self) -> &Arc<NotifierMetrics> {
        &self.metrics
    }

    /// The coin and block store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> SubscriptionConfig {
        self.config.read().clone()
    }

    /// Grant a peer the trusted limits.
    pub fn trust_peer(&self, peer: PeerId) {
        self.config.write().trusted_peers.insert(peer);
    }

    /// Forward a new peak to subscribers.
    pub async fn on_block_added(&self, event: &BlockAdded) -> usize {
        self.notifier.on_block_added(event).await
    }

    /// Forward a reorg to subscribers.
    pub async fn on_reorg(&self, event: &ChainReorged) -> usize {
        self.notifier.on_reorg(event).await
    }

    /// Explicitly drop puzzle-hash subscriptions.
    pub fn remove_puzzle_subscriptions(&self, peer: &PeerId, puzzle_hashes: &[Bytes32]) -> Vec<Bytes32> {
        self.registry.write().remove_puzzle_subscriptions(peer, puzzle_hashes)
    }

    /// Explicitly drop coin-id subscriptions.
    pub fn remove_coin_subscriptions(&self, peer: &PeerId, coin_ids: &[Bytes32]) -> Vec<Bytes32> {
        self.registry.write().remove_coin_subscriptions(peer, coin_ids)
    }

    /// Add keys under the peer's tier cap; returns the new ones and the
    /// response-size cap.
    fn subscribe(&self, peer: PeerId, kind: SubscriptionKind, keys: &[Bytes32]) -> (Vec<Bytes32>, usize) {
        let (max_items, max_response) = {
            let config = self.config.read();
            (config.max_items_for(&peer), config.max_response_items_for(&peer))
        };

        let mut registry = self.registry.write();
        let added = registry.add_subscriptions(peer, kind, keys, max_items);
        let truncated = registry.peer_subscription_count(&peer) >= max_items
            && keys.iter().any(|key| !registry.is_subscribed(&peer, kind, key));
        drop(registry);

        if truncated {
            tracing::warn!(
                "[cs-02] peer {} hit subscription cap {}, {} {:?} keys requested",
                peer,
                max_items,
                keys.len(),
                kind
            );
        }
        self.metrics.record_subscribe(added.len(), truncated);
        (added, max_response)
    }

    /// Resolve and check the block a removals/additions request names.
    async fn transaction_block(&self, height: Height, header_hash: &Bytes32) -> Option<HeaderBlock> {
        let block = self.store.header_block(header_hash).await?;
        if block.height != height || !block.is_transaction_block() {
            return None;
        }
        if self.store.height_to_hash(height).await != Some(*header_hash) {
            tracing::debug!("[cs-02] block {} is not on the best chain", header_hash);
            return None;
        }
        Some(block)
    }
}

/// Keep the first occurrence of each state.
fn dedup_states(states: Vec<CoinState>) -> Vec<CoinState> {
    let mut seen = HashSet::with_capacity(states.len());
    states.into_iter().filter(|s| seen.insert(*s)).collect()
}

#[async_trait]
impl<S, O> WalletProtocolApi for WalletProtocolService<S, O>
where
    S: CoinStore + BlockStore + 'static,
    O: PeerOutbound + 'static,
{
    async fn register_for_ph_updates(
        &self,
        peer: PeerId,
        request: RegisterForPhUpdates,
    ) -> Result<RespondToPhUpdates, SubscriptionError> {
        let (new_phs, max_response) =
            self.subscribe(peer, SubscriptionKind::PuzzleHash, &request.puzzle_hashes);

        let mut states = Vec::new();
        if !new_phs.is_empty() {
            states = self
                .store
                .coin_states_by_puzzle_hashes(&new_phs, request.min_height, max_response)
                .await?;

            let hinted = self.store.hinted_coin_ids(&new_phs).await?;
            let remaining = max_response.saturating_sub(states.len());
            if !hinted.is_empty() && remaining > 0 {
                states.extend(
                    self.store
                        .coin_states_by_ids(&hinted, request.min_height, remaining)
                        .await?,
                );
            }
        }
        let coin_states = dedup_states(states);

        tracing::debug!(
            peer = %peer,
            requested = request.puzzle_hashes.len(),
            added = new_phs.len(),
            states = coin_states.len(),
            "[cs-02] registered puzzle hashes"
        );

        Ok(RespondToPhUpdates {
            puzzle_hashes: request.puzzle_hashes,
            min_height: request.min_height,
            coin_states,
        })
    }

    async fn register_for_coin_updates(
        &self,
        peer: PeerId,
        request: RegisterForCoinUpdates,
    ) -> Result<RespondToCoinUpdates, SubscriptionError> {
        let (new_ids, max_response) = self.subscribe(peer, SubscriptionKind::CoinId, &request.coin_ids);

        let states = if new_ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .coin_states_by_ids(&new_ids, request.min_height, max_response)
                .await?
        };
        let coin_states = dedup_states(states);

        tracing::debug!(
            peer = %peer,
            requested = request.coin_ids.len(),
            added = new_ids.len(),
            states = coin_states.len(),
            "[cs-02] registered coin ids"
        );

        Ok(RespondToCoinUpdates {
            coin_ids: request.coin_ids,
            min_height: request.min_height,
            coin_states,
        })
    }

    async fn request_additions(
        &self,
        request: RequestAdditions,
    ) -> Result<AdditionsResponse, SubscriptionError> {
        let reject = AdditionsResponse::Reject(RejectAdditionsRequest {
            height: request.height,
            header_hash: request.header_hash,
        });

        let header_hash = match request.header_hash {
            Some(hash) => hash,
            None => match self.store.height_to_hash(request.height).await {
                Some(hash) => hash,
                None => return Ok(reject),
            },
        };
        let Some(block) = self.transaction_block(request.height, &header_hash).await else {
            return Ok(reject);
        };

        let mut grouped: BTreeMap<Bytes32, Vec<Coin>> = BTreeMap::new();
        for record in self.store.coins_added_at(block.height).await? {
            grouped.entry(record.coin.puzzle_hash).or_default().push(record.coin);
        }

        let Some(puzzle_hashes) = request.puzzle_hashes else {
            let coins = grouped
                .into_iter()
                .map(|(puzzle_hash, coins)| PuzzleHashCoins { puzzle_hash, coins })
                .collect();
            return Ok(AdditionsResponse::Respond(RespondAdditions {
                height: block.height,
                header_hash,
                coins,
                proofs: None,
            }));
        };

        let all_groups: Vec<PuzzleHashCoins> = grouped
            .iter()
            .map(|(puzzle_hash, coins)| PuzzleHashCoins {
                puzzle_hash: *puzzle_hash,
                coins: coins.clone(),
            })
            .collect();
        let set = MerkleSet::new(&additions_leaves(&all_groups));

        let mut coins = Vec::with_capacity(puzzle_hashes.len());
        let mut proofs = Vec::with_capacity(puzzle_hashes.len());
        for puzzle_hash in puzzle_hashes {
            let group = grouped.get(&puzzle_hash).cloned().unwrap_or_default();
            let (_, puzzle_hash_proof) = set.is_included(&puzzle_hash);
            let coin_list_proof = if group.is_empty() {
                None
            } else {
                let ids: Vec<Bytes32> = group.iter().map(Coin::coin_id).collect();
                Some(set.is_included(&hash_coin_ids(&ids)).1)
            };
            coins.push(PuzzleHashCoins {
                puzzle_hash,
                coins: group,
            });
            proofs.push(AdditionProof {
                puzzle_hash,
                puzzle_hash_proof,
                coin_list_proof,
            });
        }

        Ok(AdditionsResponse::Respond(RespondAdditions {
            height: block.height,
            header_hash,
            coins,
            proofs: Some(proofs),
        }))
    }

    async fn request_removals(
        &self,
        request: RequestRemovals,
    ) -> Result<RemovalsResponse, SubscriptionError> {
        let Some(block) = self
            .transaction_block(request.height, &request.header_hash)
            .await
        else {
            return Ok(RemovalsResponse::Reject(RejectRemovalsRequest {
                height: request.height,
                header_hash: request.header_hash,
            }));
        };

        let removed: HashMap<Bytes32, Coin> = self
            .store
            .coins_removed_at(block.height)
            .await?
            .into_iter()
            .map(|record| (record.name(), record.coin))
            .collect();

        let Some(coin_names) = request.coin_names else {
            let mut coins: Vec<RemovalEntry> = removed
                .into_iter()
                .map(|(coin_id, coin)| RemovalEntry {
                    coin_id,
                    coin: Some(coin),
                })
                .collect();
            coins.sort_by_key(|entry| entry.coin_id);
            return Ok(RemovalsResponse::Respond(RespondRemovals {
                height: block.height,
                header_hash: request.header_hash,
                coins,
                proofs: None,
            }));
        };

        let ids: Vec<Bytes32> = removed.keys().copied().collect();
        let set = MerkleSet::new(&ids);
        let mut coins = Vec::with_capacity(coin_names.len());
        let mut proofs = Vec::with_capacity(coin_names.len());
        for coin_id in coin_names {
            coins.push(RemovalEntry {
                coin_id,
                coin: removed.get(&coin_id).copied(),
            });
            proofs.push(RemovalProof {
                coin_id,
                proof: set.is_included(&coin_id).1,
            });
        }

        Ok(RemovalsResponse::Respond(RespondRemovals {
            height: block.height,
            header_hash: request.header_hash,
            coins,
            proofs: Some(proofs),
        }))
    }

    async fn request_header_blocks(
        &self,
        request: RequestHeaderBlocks,
    ) -> Result<HeaderBlocksResponse, SubscriptionError> {
        let reject = HeaderBlocksResponse::Reject(RejectHeaderBlocks {
            start_height: request.start_height,
            end_height: request.end_height,
        });
        if request.end_height < request.start_height
            || request.end_height - request.start_height > MAX_BLOCK_COUNT_PER_REQUEST
        {
            return Ok(reject);
        }

        let mut header_blocks = Vec::new();
        for height in request.start_height..=request.end_height {
            let Some(hash) = self.store.height_to_hash(height).await else {
                return Ok(reject);
            };
            let Some(block) = self.store.header_block(&hash).await else {
                return Ok(reject);
            };
            header_blocks.push(block);
        }

        Ok(HeaderBlocksResponse::Respond(RespondHeaderBlocks {
            start_height: request.start_height,
            end_height: request.end_height,
            header_blocks,
        }))
    }

    async fn on_peer_disconnected(&self, peer: PeerId) {
        self.registry.write().unregister_peer(&peer);
        tracing::debug!(peer = %peer, "[cs-02] peer disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ChannelPeerOutbound, InMemoryChainStore};
    use cs_01_merkle_set::{validate_additions, validate_removals};

    type Service = WalletProtocolService<InMemoryChainStore, ChannelPeerOutbound>;

    fn key(n: u8) -> Bytes32 {
        Bytes32([n; 32])
    }

    fn coin(n: u8, puzzle_hash: Bytes32) -> Coin {
        Coin::new(key(n), puzzle_hash, n as u64 + 1)
    }

    fn service(config: SubscriptionConfig) -> Service {
        WalletProtocolService::new(
            config,
            Arc::new(InMemoryChainStore::new()),
            Arc::new(ChannelPeerOutbound::new()),
        )
        .unwrap()
    }

    fn ph_request(keys: Vec<Bytes32>) -> RegisterForPhUpdates {
        RegisterForPhUpdates {
            puzzle_hashes: keys,
            min_height: 0,
        }
    }

    #[tokio::test]
    async fn test_subscription_cap_then_trusted() {
        let config = SubscriptionConfig::default()
            .with_max_subscribe_items(2)
            .with_trusted_max_subscribe_items(4);
        let service = service(config);
        let peer = key(100);
        let batch: Vec<Bytes32> = (0..7).map(key).collect();

        let response = service.register_for_ph_updates(peer, ph_request(batch.clone())).await.unwrap();
        assert_eq!(response.puzzle_hashes, batch);
        assert_eq!(service.registry().read().puzzle_subscription_count(), 2);

        service.trust_peer(peer);
        service.register_for_ph_updates(peer, ph_request(batch)).await.unwrap();
        assert_eq!(service.registry().read().puzzle_subscription_count(), 4);
        assert_eq!(service.metrics().snapshot().capacity_truncations, 2);
    }

    #[tokio::test]
    async fn test_backfill_only_for_new_keys_and_hints() {
        let service = service(SubscriptionConfig::for_testing());
        let ph = key(50);
        let hint = key(60);
        let plain = coin(1, ph);
        let hinted = coin(2, key(70));
        service
            .store()
            .add_block(&[(plain, None), (hinted, Some(hint))], &[], 1)
            .unwrap();

        let peer = key(100);
        let first = service
            .register_for_ph_updates(peer, ph_request(vec![ph, hint]))
            .await
            .unwrap();
        let mut coins: Vec<Coin> = first.coin_states.iter().map(|s| s.coin).collect();
        coins.sort();
        let mut expected = vec![plain, hinted];
        expected.sort();
        assert_eq!(coins, expected);

        let again = service.register_for_ph_updates(peer, ph_request(vec![ph])).await.unwrap();
        assert!(again.coin_states.is_empty());
        assert_eq!(again.puzzle_hashes, vec![ph]);
    }

    #[tokio::test]
    async fn test_register_coin_ids_respects_min_height() {
        let service = service(SubscriptionConfig::for_testing());
        let early = coin(1, key(50));
        let late = coin(2, key(50));
        service.store().add_block(&[(early, None)], &[], 1).unwrap();
        service.store().add_block(&[(late, None)], &[], 2).unwrap();

        let response = service
            .register_for_coin_updates(
                key(100),
                RegisterForCoinUpdates {
                    coin_ids: vec![early.coin_id(), late.coin_id()],
                    min_height: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(response.coin_states, vec![CoinState::new(late, Some(2), None)]);
    }

    #[tokio::test]
    async fn test_additions_with_and_without_proofs_validate() {
        let service = service(SubscriptionConfig::for_testing());
        let ph_a = key(50);
        let ph_b = key(51);
        let added = service
            .store()
            .add_block(
                &[(coin(1, ph_a), None), (coin(2, ph_a), None), (coin(3, ph_b), None)],
                &[],
                1,
            )
            .unwrap();
        let root = added.block.transactions_info.unwrap().additions_root;

        let AdditionsResponse::Respond(all) = service
            .request_additions(RequestAdditions {
                height: 1,
                header_hash: None,
                puzzle_hashes: None,
            })
            .await
            .unwrap()
        else {
            panic!("expected RespondAdditions");
        };
        assert!(all.proofs.is_none());
        assert!(validate_additions(&all.coins, None, &root));

        let AdditionsResponse::Respond(some) = service
            .request_additions(RequestAdditions {
                height: 1,
                header_hash: Some(added.block.header_hash),
                puzzle_hashes: Some(vec![ph_a, key(99)]),
            })
            .await
            .unwrap()
        else {
            panic!("expected RespondAdditions");
        };
        assert_eq!(some.coins[0].coins.len(), 2);
        assert!(some.coins[1].coins.is_empty());
        assert!(validate_additions(&some.coins, some.proofs.as_deref(), &root));
    }

    #[tokio::test]
    async fn test_removals_with_proofs_validate() {
        let service = service(SubscriptionConfig::for_testing());
        let spent = coin(1, key(50));
        service.store().add_block(&[(spent, None)], &[], 1).unwrap();
        let block = service.store().add_block(&[], &[spent.coin_id()], 2).unwrap().block;
        let root = block.transactions_info.unwrap().removals_root;

        let RemovalsResponse::Respond(response) = service
            .request_removals(RequestRemovals {
                height: 2,
                header_hash: block.header_hash,
                coin_names: Some(vec![spent.coin_id(), key(77)]),
            })
            .await
            .unwrap()
        else {
            panic!("expected RespondRemovals");
        };
        assert_eq!(response.coins[0].coin, Some(spent));
        assert_eq!(response.coins[1].coin, None);
        assert!(validate_removals(&response.coins, response.proofs.as_deref(), &root));

        let RemovalsResponse::Respond(all) = service
            .request_removals(RequestRemovals {
                height: 2,
                header_hash: block.header_hash,
                coin_names: None,
            })
            .await
            .unwrap()
        else {
            panic!("expected RespondRemovals");
        };
        assert!(validate_removals(&all.coins, None, &root));
    }

    #[tokio::test]
    async fn test_rejects_unknown_orphaned_and_non_transaction_blocks() {
        let service = service(SubscriptionConfig::for_testing());
        service.store().add_block(&[(coin(1, key(50)), None)], &[], 1).unwrap();
        let orphan = service.store().add_block(&[], &[], 2).unwrap().block;
        service.store().rollback_to(1).unwrap();

        let orphaned = service
            .request_removals(RequestRemovals {
                height: 2,
                header_hash: orphan.header_hash,
                coin_names: None,
            })
            .await
            .unwrap();
        assert!(matches!(orphaned, RemovalsResponse::Reject(_)));

        let genesis = service
            .request_additions(RequestAdditions {
                height: 0,
                header_hash: None,
                puzzle_hashes: None,
            })
            .await
            .unwrap();
        assert!(matches!(genesis, AdditionsResponse::Reject(_)));

        let missing = service
            .request_additions(RequestAdditions {
                height: 9,
                header_hash: None,
                puzzle_hashes: None,
            })
            .await
            .unwrap();
        assert!(matches!(missing, AdditionsResponse::Reject(_)));
    }

    #[tokio::test]
    async fn test_header_block_ranges() {
        let service = service(SubscriptionConfig::for_testing());
        for t in 1..=3 {
            service.store().add_block(&[], &[], t).unwrap();
        }

        let ok = service
            .request_header_blocks(RequestHeaderBlocks {
                start_height: 1,
                end_height: 3,
            })
            .await
            .unwrap();
        let HeaderBlocksResponse::Respond(ok) = ok else {
            panic!("expected RespondHeaderBlocks");
        };
        assert_eq!(ok.header_blocks.len(), 3);
        assert_eq!(ok.header_blocks[1].prev_header_hash, ok.header_blocks[0].header_hash);

        for (start, end) in [(3, 1), (0, 200), (2, 4)] {
            let response = service
                .request_header_blocks(RequestHeaderBlocks {
                    start_height: start,
                    end_height: end,
                })
                .await
                .unwrap();
            assert!(matches!(response, HeaderBlocksResponse::Reject(_)), "{start}..{end}");
        }
    }

    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let service = service(SubscriptionConfig::for_testing());
        let peer = key(100);
        service.register_for_ph_updates(peer, ph_request(vec![key(1)])).await.unwrap();
        service.on_peer_disconnected(peer).await;
        service.on_peer_disconnected(peer).await;
        assert_eq!(service.registry().read().puzzle_subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_explicit_unsubscribe() {
        let service = service(SubscriptionConfig::for_testing());
        let peer = key(100);
        service.register_for_ph_updates(peer, ph_request(vec![key(1), key(2)])).await.unwrap();
        assert_eq!(service.remove_puzzle_subscriptions(&peer, &[key(1)]), vec![key(1)]);
        assert!(service.remove_coin_subscriptions(&peer, &[key(1)]).is_empty());
        assert_eq!(service.registry().read().peer_subscription_count(&peer), 1);
    }
}
