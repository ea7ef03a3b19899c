//! # Channel Peer Outbound
//!
//! Delivers messages over one unbounded `mpsc` channel per connected peer,
//! which keeps per-peer delivery order.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{PeerId, ProtocolMessage};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::domain::SubscriptionError;
use crate::ports::PeerOutbound;

/// Channel-backed peer transport.
#[derive(Default)]
pub struct ChannelPeerOutbound {
    peers: RwLock<HashMap<PeerId, mpsc::UnboundedSender<ProtocolMessage>>>,
}

impl ChannelPeerOutbound {
    /// Create a transport with no peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and return its receiving end. Replaces any earlier
    /// connection for the same peer.
    pub fn connect(&self, peer: PeerId) -> mpsc::UnboundedReceiver<ProtocolMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().insert(peer, tx);
        rx
    }

    /// Drop a peer's sending end.
    pub fn disconnect(&self, peer: &PeerId) {
        self.peers.write().remove(peer);
    }

    /// Number of connected peers.
    pub fn connected(&self) -> usize {
        self.peers.read().len()
    }
}

#[async_trait]
impl PeerOutbound for ChannelPeerOutbound {
    async fn send(&self, peer: &PeerId, message: ProtocolMessage) -> Result<(), SubscriptionError> {
        let sender = self.peers.read().get(peer).cloned();
        let Some(sender) = sender else {
            return Err(SubscriptionError::PeerUnreachable {
                peer: *peer,
                reason: "not connected".to_string(),
            });
        };
        sender
            .send(message)
            .map_err(|_| SubscriptionError::PeerUnreachable {
                peer: *peer,
                reason: "receiver dropped".to_string(),
            })
    }
}
