//! # Integration Test Flows
//!
//! A cs-02 full node and a cs-03 wallet connected through
//! [`LoopbackPeer`](super::LoopbackPeer).
//!
//! ## Flows Tested:
//!
//! 1. **Registration caps**: untrusted and trusted limits over wire frames
//! 2. **Block added → CoinStateUpdate → wallet**: pushed states are proven
//!    and applied, including hinted coins and later spends
//! 3. **Reorg**: one creation update, one reorg update at the fork point,
//!    then the wallet follows the new peak
//! 4. **Lying peer**: forged states or retractions on an unchanged chain get
//!    the peer closed and unsubscribed

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cs_02_coin_subscriptions::SubscriptionConfig;
    use cs_03_wallet_sync::{
        FullNodePeer, InMemoryWalletStore, SyncOutcome, WalletCoinStore, WalletSyncApi,
        WalletSyncConfig, WalletSyncError, WalletSyncService,
    };
    use shared_types::{
        Bytes32, Coin, CoinState, CoinStateUpdate, PeerId, ProtocolMessage, RegisterForPhUpdates,
    };

    use crate::integration::{forward_messages, init_test_logging, FullNodeHarness, LoopbackPeer};

    type Wallet = WalletSyncService<LoopbackPeer, InMemoryWalletStore>;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn key(n: u8) -> Bytes32 {
        Bytes32([n; 32])
    }

    fn coin(n: u8, puzzle_hash: Bytes32) -> Coin {
        Coin::new(key(n), puzzle_hash, n as u64 * 1_000)
    }

    fn full_node() -> FullNodeHarness {
        init_test_logging();
        FullNodeHarness::new(SubscriptionConfig::for_testing()).unwrap()
    }

    fn wallet_on(node: &FullNodeHarness, peers: &[Arc<LoopbackPeer>]) -> Wallet {
        let wallet = WalletSyncService::new(
            WalletSyncConfig::for_testing(),
            node.genesis().unwrap(),
            Arc::new(InMemoryWalletStore::new()),
        )
        .unwrap();
        for peer in peers {
            wallet.add_peer(peer.clone());
        }
        wallet
    }

    fn expect_update(message: Option<ProtocolMessage>) -> CoinStateUpdate {
        match message {
            Some(ProtocolMessage::CoinStateUpdate(update)) => update,
            other => panic!("expected a CoinStateUpdate, got {other:?}"),
        }
    }

    // =============================================================================
    // REGISTRATION LIMITS
    // =============================================================================

    #[tokio::test]
    async fn test_subscription_cap_then_trusted_cap() {
        init_test_logging();
        let config = SubscriptionConfig::for_testing()
            .with_max_subscribe_items(2)
            .with_trusted_max_subscribe_items(4);
        let node = FullNodeHarness::new(config).unwrap();
        let (peer, _rx) = node.connect(key(1));
        let batch: Vec<Bytes32> = (10..17).map(key).collect();

        let request = RegisterForPhUpdates {
            puzzle_hashes: batch.clone(),
            min_height: 0,
        };
        let response = peer.register_for_ph_updates(request.clone()).await.unwrap();
        assert_eq!(response.puzzle_hashes, batch);
        assert_eq!(node.node.registry().read().puzzle_subscription_count(), 2);

        node.node.trust_peer(key(1));
        peer.register_for_ph_updates(request).await.unwrap();
        assert_eq!(node.node.registry().read().puzzle_subscription_count(), 4);
        assert_eq!(node.node.metrics().snapshot().capacity_truncations, 2);
    }

    // =============================================================================
    // BLOCK ADDED → WALLET
    // =============================================================================

    #[tokio::test]
    async fn test_pushed_states_are_proven_and_applied() {
        let node = full_node();
        let (peer, mut rx) = node.connect(key(1));
        let wallet = wallet_on(&node, &[peer]);
        let ph = key(50);

        wallet.subscribe_to_puzzle_hashes(vec![ph]);
        assert_eq!(
            wallet.process_pending().await.unwrap(),
            vec![SyncOutcome::Subscribed {
                peer: key(1),
                applied: 0,
                rejected: 0,
            }]
        );

        let owned = coin(1, ph);
        let hinted = coin(2, key(60));
        node.add_block(&[(owned, None), (hinted, Some(ph)), (coin(3, key(70)), None)], &[], 1_000)
            .await
            .unwrap();
        assert_eq!(forward_messages(&mut rx, &wallet, key(1)).unwrap(), 1);
        assert_eq!(
            wallet.process_pending().await.unwrap(),
            vec![SyncOutcome::StatesApplied {
                peer: key(1),
                applied: 2,
                rejected: 0,
                rolled_back_to: None,
            }]
        );
        assert_eq!(wallet.peak_height(), 1);
        assert_eq!(wallet.store().unspent_balance(), 3_000);

        node.add_block(&[], &[owned.coin_id()], 1_010).await.unwrap();
        forward_messages(&mut rx, &wallet, key(1)).unwrap();
        wallet.process_pending().await.unwrap();

        let state = wallet.store().get_coin_state(&owned.coin_id()).await.unwrap();
        assert_eq!(state, Some(CoinState::new(owned, Some(1), Some(2))));
        assert_eq!(wallet.store().unspent_balance(), 2_000);
        assert_eq!(wallet.timestamp_for_height(2).await.unwrap(), Some(1_010));
    }

    // =============================================================================
    // REORG
    // =============================================================================

    #[tokio::test]
    async fn test_reorg_below_creation_height() {
        let node = full_node();
        let (peer, mut rx) = node.connect(key(1));
        let wallet = wallet_on(&node, &[peer]);
        let ph = key(50);
        let doomed = coin(1, ph);

        node.add_block(&[], &[], 1_000).await.unwrap();
        wallet.subscribe_to_puzzle_hashes(vec![ph]);
        wallet.process_pending().await.unwrap();

        node.add_block(&[(doomed, None)], &[], 1_010).await.unwrap();
        let creation = expect_update(rx.try_recv().ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(creation.items, vec![CoinState::new(doomed, Some(2), None)]);
        assert!(!creation.is_reorg());

        wallet.on_coin_state_update(creation, key(1));
        wallet.process_pending().await.unwrap();
        assert_eq!(wallet.store().len(), 1);

        node.reorg(1).await.unwrap();
        let reorg = expect_update(rx.try_recv().ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(reorg.fork_height, 1);
        assert_eq!(reorg.items, vec![CoinState::retracted(doomed)]);
        assert!(reorg.items.iter().all(|s| s.created_height.is_none() && s.spent_height.is_none()));

        // The reorg update only reaches height 1, so the retraction waits
        // for the heavier peak to move the fork point.
        node.add_block(&[], &[], 1_020).await.unwrap();
        node.add_block(&[], &[], 1_030).await.unwrap();
        let peak = node.announce(1).unwrap();
        let new_tip = peak.header_hash;
        wallet.on_coin_state_update(reorg, key(1));
        wallet.on_new_peak(peak, key(1));

        let outcomes = wallet.process_pending().await.unwrap();
        assert_eq!(
            outcomes,
            vec![
                SyncOutcome::StatesApplied {
                    peer: key(1),
                    applied: 0,
                    rejected: 0,
                    rolled_back_to: None,
                },
                SyncOutcome::PeakSynced {
                    peer: key(1),
                    height: 3,
                },
            ]
        );
        assert!(wallet.store().is_empty());
        assert_eq!(wallet.trusted_hash_at(3), Some(new_tip));
    }

    // =============================================================================
    // LYING PEER
    // =============================================================================

    #[tokio::test]
    async fn test_forged_state_closes_peer_and_falls_back() {
        let node = full_node();
        let (liar, _liar_rx) = node.connect(key(1));
        let (honest, _honest_rx) = node.connect(key(2));
        let wallet = wallet_on(&node, &[liar.clone(), honest.clone()]);
        let ph = key(50);
        let real = coin(1, ph);

        node.add_block(&[(real, None)], &[], 1_000).await.unwrap();
        liar.forge_states(vec![CoinState::new(coin(9, ph), Some(1), None)]);

        wallet.subscribe_to_puzzle_hashes(vec![ph]);
        let outcome = wallet.process_next().await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Subscribed {
                peer: key(2),
                applied: 1,
                rejected: 0,
            }
        );

        assert!(liar.is_closed());
        assert!(!honest.is_closed());
        assert_eq!(wallet.peer_ids(), vec![key(2)]);
        assert_eq!(node.node.registry().read().peer_subscription_count(&key(1)), 0);
        assert_eq!(node.outbound.connected(), 1);
        assert_eq!(
            wallet.store().coin_states().await.unwrap(),
            vec![CoinState::new(real, Some(1), None)]
        );
    }

    #[tokio::test]
    async fn test_retraction_on_unchanged_chain_closes_peer() {
        let node = full_node();
        let (peer, _rx) = node.connect(key(1));
        let wallet = wallet_on(&node, &[peer.clone()]);
        let ph = key(50);
        let held = coin(1, ph);

        node.add_block(&[(held, None)], &[], 1_000).await.unwrap();
        wallet.subscribe_to_puzzle_hashes(vec![ph]);
        wallet.process_pending().await.unwrap();
        let tip = node.announce(0).unwrap();

        wallet.on_coin_state_update(
            CoinStateUpdate {
                height: tip.height,
                fork_height: 0,
                peak_hash: tip.header_hash,
                items: vec![CoinState::retracted(held)],
            },
            key(1),
        );
        assert_eq!(
            wallet.process_pending().await.unwrap(),
            vec![SyncOutcome::PeerDropped { peer: key(1) }]
        );
        assert!(peer.is_closed());
        assert_eq!(
            wallet.store().coin_states().await.unwrap(),
            vec![CoinState::new(held, Some(1), None)]
        );
        assert_eq!(wallet.trusted_hash_at(1), Some(tip.header_hash));
    }

    #[tokio::test]
    async fn test_no_honest_peer_left() {
        let node = full_node();
        let (liar, _rx) = node.connect(key(1));
        let wallet = wallet_on(&node, &[liar.clone()]);
        liar.forge_states(vec![CoinState::new(coin(9, key(50)), Some(0), None)]);

        wallet.subscribe_to_coin_ids(vec![coin(9, key(50)).coin_id()]);
        assert_eq!(
            wallet.process_pending().await,
            Err(WalletSyncError::NoPeersAvailable)
        );
        assert!(wallet.store().is_empty());
        assert!(liar.is_closed());
    }

    #[tokio::test]
    async fn test_full_node_does_not_serve_sub_epoch_summaries() {
        let node = full_node();
        let (peer, _rx) = node.connect(key(1));
        let id: PeerId = peer.peer_id();
        let wallet = wallet_on(&node, &[peer]);

        assert!(matches!(
            wallet.ses_info(id, 0).await,
            Err(WalletSyncError::PeerRejected { .. })
        ));
    }
}
