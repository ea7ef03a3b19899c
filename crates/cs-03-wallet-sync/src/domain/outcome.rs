//! Result of processing one queue item.

use shared_types::{Height, PeerId};

/// What the sync loop did with one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A peer accepted a subscription; returned states were validated.
    Subscribed {
        /// Peer that answered
        peer: PeerId,
        /// States written to the wallet store
        applied: usize,
        /// States that failed validation
        rejected: usize,
    },
    /// A pushed update was applied.
    StatesApplied {
        /// Sender
        peer: PeerId,
        /// States written to the wallet store
        applied: usize,
        /// States that failed validation
        rejected: usize,
        /// Fork point the wallet rolled back to after checking the peer's headers
        rolled_back_to: Option<Height>,
    },
    /// The trusted chain now reaches the announced peak.
    PeakSynced {
        /// Announcing peer
        peer: PeerId,
        /// New peak height
        height: Height,
    },
    /// The peer failed or lied and was disconnected.
    PeerDropped {
        /// The peer
        peer: PeerId,
    },
    /// Nothing to do: stale peak or unknown sender.
    Ignored,
}
