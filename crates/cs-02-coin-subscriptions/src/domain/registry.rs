//! # Subscription Registry
//!
//! Tracks which peers want updates for which puzzle hashes and coin ids.
//!
//! Each peer has one subscription counter shared by both kinds. Once the
//! counter reaches the caller-supplied cap, further keys are dropped without
//! error.

use shared_types::{Bytes32, PeerId};
use std::collections::{HashMap, HashSet};

/// Subscription kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// Keyed by puzzle hash.
    PuzzleHash,
    /// Keyed by coin id.
    CoinId,
}

#[derive(Debug, Default)]
struct KindIndex {
    by_key: HashMap<Bytes32, HashSet<PeerId>>,
    by_peer: HashMap<PeerId, HashSet<Bytes32>>,
}

impl KindIndex {
    fn insert(&mut self, peer: PeerId, key: Bytes32) -> bool {
        let peers = self.by_key.entry(key).or_default();
        if !peers.insert(peer) {
            return false;
        }
        self.by_peer.entry(peer).or_default().insert(key);
        true
    }

    fn remove(&mut self, peer: &PeerId, key: &Bytes32) -> bool {
        let Some(peers) = self.by_key.get_mut(key) else {
            return false;
        };
        if !peers.remove(peer) {
            return false;
        }
        if peers.is_empty() {
            self.by_key.remove(key);
        }
        if let Some(keys) = self.by_peer.get_mut(peer) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_peer.remove(peer);
            }
        }
        true
    }

    fn remove_peer(&mut self, peer: &PeerId) {
        let Some(keys) = self.by_peer.remove(peer) else {
            return;
        };
        for key in keys {
            if let Some(peers) = self.by_key.get_mut(&key) {
                peers.remove(peer);
                if peers.is_empty() {
                    self.by_key.remove(&key);
                }
            }
        }
    }

    fn peers(&self, key: &Bytes32) -> impl Iterator<Item = &PeerId> {
        self.by_key.get(key).into_iter().flatten()
    }
}

/// Peer-scoped interest tracking.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    puzzle_hashes: KindIndex,
    coin_ids: KindIndex,
    peer_counts: HashMap<PeerId, usize>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self, kind: SubscriptionKind) -> &KindIndex {
        match kind {
            SubscriptionKind::PuzzleHash => &self.puzzle_hashes,
            SubscriptionKind::CoinId => &self.coin_ids,
        }
    }

    /// Subscribe `peer` to each key it does not already hold, stopping once
    /// the peer holds `max_items` subscriptions.
    ///
    /// Returns the keys added by this call, in request order.
    pub fn add_subscriptions(
        &mut self,
        peer: PeerId,
        kind: SubscriptionKind,
        keys: &[Bytes32],
        max_items: usize,
    ) -> Vec<Bytes32> {
        let mut count = self.peer_counts.get(&peer).copied().unwrap_or(0);
        if count >= max_items {
            tracing::info!(
                "[cs-02] peer {} reached max subscriptions ({}), ignoring {} {:?} keys",
                peer,
                max_items,
                keys.len(),
                kind
            );
            return Vec::new();
        }

        let index = match kind {
            SubscriptionKind::PuzzleHash => &mut self.puzzle_hashes,
            SubscriptionKind::CoinId => &mut self.coin_ids,
        };
        let mut added = Vec::new();
        for key in keys {
            if !index.insert(peer, *key) {
                continue;
            }
            added.push(*key);
            count += 1;
            if count >= max_items {
                tracing::info!(
                    "[cs-02] peer {} reached max subscriptions ({})",
                    peer,
                    max_items
                );
                break;
            }
        }

        if count > 0 {
            self.peer_counts.insert(peer, count);
        }
        added
    }

    /// Subscribe `peer` to puzzle hashes. See [`add_subscriptions`](Self::add_subscriptions).
    pub fn add_puzzle_subscriptions(
        &mut self,
        peer: PeerId,
        puzzle_hashes: &[Bytes32],
        max_items: usize,
    ) -> Vec<Bytes32> {
        self.add_subscriptions(peer, SubscriptionKind::PuzzleHash, puzzle_hashes, max_items)
    }

    /// Subscribe `peer` to coin ids. See [`add_subscriptions`](Self::add_subscriptions).
    pub fn add_coin_subscriptions(
        &mut self,
        peer: PeerId,
        coin_ids: &[Bytes32],
        max_items: usize,
    ) -> Vec<Bytes32> {
        self.add_subscriptions(peer, SubscriptionKind::CoinId, coin_ids, max_items)
    }

    /// Drop specific subscriptions. Returns the keys that were held.
    pub fn remove_subscriptions(
        &mut self,
        peer: &PeerId,
        kind: SubscriptionKind,
        keys: &[Bytes32],
    ) -> Vec<Bytes32> {
        let index = match kind {
            SubscriptionKind::PuzzleHash => &mut self.puzzle_hashes,
            SubscriptionKind::CoinId => &mut self.coin_ids,
        };
        let removed: Vec<Bytes32> = keys.iter().filter(|k| index.remove(peer, k)).copied().collect();

        if let Some(count) = self.peer_counts.get_mut(peer) {
            *count = count.saturating_sub(removed.len());
            if *count == 0 {
                self.peer_counts.remove(peer);
            }
        }
        removed
    }

    /// Drop puzzle-hash subscriptions.
    pub fn remove_puzzle_subscriptions(&mut self, peer: &PeerId, puzzle_hashes: &[Bytes32]) -> Vec<Bytes32> {
        self.remove_subscriptions(peer, SubscriptionKind::PuzzleHash, puzzle_hashes)
    }

    /// Drop coin-id subscriptions.
    pub fn remove_coin_subscriptions(&mut self, peer: &PeerId, coin_ids: &[Bytes32]) -> Vec<Bytes32> {
        self.remove_subscriptions(peer, SubscriptionKind::CoinId, coin_ids)
    }

    /// Drop everything held by `peer`. Idempotent.
    pub fn unregister_peer(&mut self, peer: &PeerId) {
        self.puzzle_hashes.remove_peer(peer);
        self.coin_ids.remove_peer(peer);
        self.peer_counts.remove(peer);
    }

    /// Peers subscribed to this puzzle hash.
    pub fn peers_for_puzzle_hash(&self, puzzle_hash: &Bytes32) -> impl Iterator<Item = &PeerId> {
        self.puzzle_hashes.peers(puzzle_hash)
    }

    /// Peers subscribed to this coin id.
    pub fn peers_for_coin_id(&self, coin_id: &Bytes32) -> impl Iterator<Item = &PeerId> {
        self.coin_ids.peers(coin_id)
    }

    /// Whether `peer` holds this subscription.
    pub fn is_subscribed(&self, peer: &PeerId, kind: SubscriptionKind, key: &Bytes32) -> bool {
        self.index(kind)
            .by_key
            .get(key)
            .is_some_and(|peers| peers.contains(peer))
    }

    /// Whether any peer subscribes to this puzzle hash.
    pub fn has_puzzle_subscription(&self, puzzle_hash: &Bytes32) -> bool {
        self.puzzle_hashes.by_key.contains_key(puzzle_hash)
    }

    /// Whether any peer subscribes to this coin id.
    pub fn has_coin_subscription(&self, coin_id: &Bytes32) -> bool {
        self.coin_ids.by_key.contains_key(coin_id)
    }

    /// Distinct puzzle hashes with at least one subscriber.
    pub fn puzzle_subscription_count(&self) -> usize {
        self.puzzle_hashes.by_key.len()
    }

    /// Distinct coin ids with at least one subscriber.
    pub fn coin_subscription_count(&self) -> usize {
        self.coin_ids.by_key.len()
    }

    /// Subscriptions held by `peer`, both kinds combined.
    pub fn peer_subscription_count(&self, peer: &PeerId) -> usize {
        self.peer_counts.get(peer).copied().unwrap_or(0)
    }

    /// Keys of one kind held by `peer`.
    pub fn subscriptions_of(&self, peer: &PeerId, kind: SubscriptionKind) -> HashSet<Bytes32> {
        self.index(kind).by_peer.get(peer).cloned().unwrap_or_default()
    }

    /// Peers holding at least one subscription.
    pub fn peer_count(&self) -> usize {
        self.peer_counts.len()
    }
}
