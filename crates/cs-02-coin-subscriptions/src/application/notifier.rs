//! # Coin State Notifier
//!
//! Turns chain events into one `CoinStateUpdate` per interested peer.
//!
//! A coin reaches a peer when the peer subscribes to the coin id, to the
//! coin's puzzle hash, or to the coin's hint. Each peer gets each state once
//! per update however many of its subscriptions match.

use parking_lot::RwLock;
use shared_types::{Bytes32, CoinState, CoinStateUpdate, Height, PeerId, ProtocolMessage};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::domain::{BlockAdded, ChainReorged, SubscriptionRegistry};
use crate::metrics::NotifierMetrics;
use crate::ports::PeerOutbound;

/// Per-peer coin state fan-out.
pub struct CoinStateNotifier<O: PeerOutbound> {
    registry: Arc<RwLock<SubscriptionRegistry>>,
    outbound: Arc<O>,
    metrics: Arc<NotifierMetrics>,
}

impl<O: PeerOutbound> CoinStateNotifier<O> {
    /// Create a notifier over a shared registry.
    pub fn new(
        registry: Arc<RwLock<SubscriptionRegistry>>,
        outbound: Arc<O>,
        metrics: Arc<NotifierMetrics>,
    ) -> Self {
        Self {
            registry,
            outbound,
            metrics,
        }
    }

    /// Group `states` by interested peer.
    ///
    /// Peers and items come out sorted so the result is deterministic.
    pub fn updates_for(
        &self,
        height: Height,
        fork_height: Height,
        peak_hash: Bytes32,
        states: &[(CoinState, Option<Bytes32>)],
    ) -> Vec<(PeerId, CoinStateUpdate)> {
        let registry = self.registry.read();
        let mut per_peer: BTreeMap<PeerId, BTreeSet<CoinState>> = BTreeMap::new();

        for (state, hint) in states {
            let coin_id = state.coin.coin_id();
            let peers = registry
                .peers_for_coin_id(&coin_id)
                .chain(registry.peers_for_puzzle_hash(&state.coin.puzzle_hash))
                .chain(hint.iter().flat_map(|h| registry.peers_for_puzzle_hash(h)));
            for peer in peers {
                per_peer.entry(*peer).or_default().insert(*state);
            }
        }

        per_peer
            .into_iter()
            .map(|(peer, items)| {
                (
                    peer,
                    CoinStateUpdate {
                        height,
                        fork_height,
                        peak_hash,
                        items: items.into_iter().collect(),
                    },
                )
            })
            .collect()
    }

    /// Notify peers about a new peak. Returns the number of updates queued.
    pub async fn on_block_added(&self, event: &BlockAdded) -> usize {
        let updates = self.updates_for(
            event.block.height,
            0,
            event.block.header_hash,
            &event.coin_states(),
        );
        tracing::debug!(
            height = event.block.height,
            peers = updates.len(),
            "[cs-02] block added"
        );
        self.deliver(updates).await
    }

    /// Notify peers that earlier states were rolled back.
    pub async fn on_reorg(&self, event: &ChainReorged) -> usize {
        let updates = self.updates_for(
            event.peak.height,
            event.fork_height,
            event.peak.header_hash,
            &event.coin_states(),
        );
        tracing::info!(
            fork_height = event.fork_height,
            retracted = event.retracted.len(),
            peers = updates.len(),
            "[cs-02] chain reorg"
        );
        self.deliver(updates).await
    }

    async fn deliver(&self, updates: Vec<(PeerId, CoinStateUpdate)>) -> usize {
        let mut delivered = 0;
        for (peer, update) in updates {
            let items = update.items.len();
            match self
                .outbound
                .send(&peer, ProtocolMessage::CoinStateUpdate(update))
                .await
            {
                Ok(()) => {
                    self.metrics.record_update(items);
                    delivered += 1;
                }
                Err(e) => {
                    self.metrics.record_send_failure();
                    tracing::warn!("[cs-02] failed to notify peer {}: {}", peer, e);
                }
            }
        }
        delivered
    }
}
