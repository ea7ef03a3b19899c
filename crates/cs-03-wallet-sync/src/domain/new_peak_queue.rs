//! # New Peak Queue
//!
//! The single ordering point between the wallet's network handlers and its
//! sync loop.
//!
//! | Class | Rank | Order within class | Counts as pending data |
//! |-------|------|--------------------|------------------------|
//! | Coin id subscription | 1 | FIFO | yes |
//! | Puzzle hash subscription | 2 | FIFO | yes |
//! | Full node state update | 3 | height, then FIFO | yes |
//! | New peak announcement | 4 | height, then FIFO | no |
//!
//! Lower rank is served first regardless of age, so a subscription is always
//! acknowledged before any state that might reference it.

use parking_lot::Mutex;
use shared_types::{Bytes32, CoinStateUpdate, Height, NewPeakWallet, PeerId};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tokio::sync::Notify;

/// Priority class of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NewPeakQueueClass {
    /// Wallet asked to follow coin ids.
    CoinSubscription = 1,
    /// Wallet asked to follow puzzle hashes.
    PuzzleHashSubscription = 2,
    /// A full node pushed coin state changes.
    FullNodeStateUpdated = 3,
    /// A full node announced a new peak.
    NewPeakWallet = 4,
}

/// Work item for the wallet sync loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewPeakItem {
    /// Register coin ids with a peer.
    CoinSubscription(Vec<Bytes32>),
    /// Register puzzle hashes with a peer.
    PuzzleHashSubscription(Vec<Bytes32>),
    /// Apply a pushed update from `peer`.
    FullNodeStateUpdated {
        /// The update
        update: CoinStateUpdate,
        /// Sender
        peer: PeerId,
    },
    /// Follow a new peak announced by `peer`.
    NewPeakWallet {
        /// The announcement
        peak: NewPeakWallet,
        /// Sender
        peer: PeerId,
    },
}

impl NewPeakItem {
    /// Priority class.
    pub fn class(&self) -> NewPeakQueueClass {
        match self {
            NewPeakItem::CoinSubscription(_) => NewPeakQueueClass::CoinSubscription,
            NewPeakItem::PuzzleHashSubscription(_) => NewPeakQueueClass::PuzzleHashSubscription,
            NewPeakItem::FullNodeStateUpdated { .. } => NewPeakQueueClass::FullNodeStateUpdated,
            NewPeakItem::NewPeakWallet { .. } => NewPeakQueueClass::NewPeakWallet,
        }
    }

    /// Height used to order items within a class; subscriptions have none.
    pub fn height(&self) -> Height {
        match self {
            NewPeakItem::CoinSubscription(_) | NewPeakItem::PuzzleHashSubscription(_) => 0,
            NewPeakItem::FullNodeStateUpdated { update, .. } => update.height,
            NewPeakItem::NewPeakWallet { peak, .. } => peak.height,
        }
    }

    /// Whether the item changes wallet state.
    pub fn is_data_process_item(&self) -> bool {
        self.class() != NewPeakQueueClass::NewPeakWallet
    }
}

/// Sort key: class, then height, then arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    class: NewPeakQueueClass,
    height: Height,
    seq: u64,
}

#[derive(Debug)]
struct Queued {
    key: QueueKey,
    item: NewPeakItem,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<Queued>>,
    next_seq: u64,
    pending_data_items: usize,
}

/// Priority queue feeding the wallet sync loop.
#[derive(Debug, Default)]
pub struct NewPeakQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl NewPeakQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a coin id subscription.
    pub fn subscribe_to_coin_ids(&self, coin_ids: Vec<Bytes32>) {
        self.put(NewPeakItem::CoinSubscription(coin_ids));
    }

    /// Queue a puzzle hash subscription.
    pub fn subscribe_to_puzzle_hashes(&self, puzzle_hashes: Vec<Bytes32>) {
        self.put(NewPeakItem::PuzzleHashSubscription(puzzle_hashes));
    }

    /// Queue a pushed coin state update.
    pub fn full_node_state_updated(&self, update: CoinStateUpdate, peer: PeerId) {
        self.put(NewPeakItem::FullNodeStateUpdated { update, peer });
    }

    /// Queue a peak announcement.
    pub fn new_peak_wallet(&self, peak: NewPeakWallet, peer: PeerId) {
        self.put(NewPeakItem::NewPeakWallet { peak, peer });
    }

    /// Queue any item.
    pub fn put(&self, item: NewPeakItem) {
        {
            let mut state = self.state.lock();
            let key = QueueKey {
                class: item.class(),
                height: item.height(),
                seq: state.next_seq,
            };
            state.next_seq += 1;
            if item.is_data_process_item() {
                state.pending_data_items += 1;
            }
            state.heap.push(Reverse(Queued { key, item }));
        }
        self.notify.notify_one();
    }

    /// Wait for the highest-priority item.
    pub async fn get(&self) -> NewPeakItem {
        loop {
            if let Some(item) = self.try_get() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Take the highest-priority item if one is queued.
    pub fn try_get(&self) -> Option<NewPeakItem> {
        let mut state = self.state.lock();
        let Reverse(queued) = state.heap.pop()?;
        if queued.item.is_data_process_item() {
            state.pending_data_items -= 1;
        }
        Some(queued.item)
    }

    /// Whether a subscription or state update is still unconsumed.
    pub fn has_pending_data_process_items(&self) -> bool {
        self.state.lock().pending_data_items > 0
    }

    /// Items queued.
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
