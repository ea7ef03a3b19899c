//! # Loopback Transport
//!
//! A wallet-side [`FullNodePeer`] that talks to an in-process full node.
//! Every request and every response is encoded to a wire frame and decoded
//! again before it is used, so the flows exercise the codec as well.

use async_trait::async_trait;
use cs_02_coin_subscriptions::{
    BlockAdded, ChainReorged, ChannelPeerOutbound, InMemoryChainStore, SubscriptionConfig,
    SubscriptionError, WalletProtocolApi, WalletProtocolService,
};
use cs_03_wallet_sync::{FullNodePeer, WalletSyncApi, WalletSyncError};
use cs_telemetry::{init_logging, TelemetryConfig};
use parking_lot::Mutex;
use shared_types::{
    AdditionsResponse, Bytes32, Coin, CoinState, HeaderBlock, HeaderBlocksResponse, Height,
    NewPeakWallet, PeerId, ProtocolError, ProtocolMessage, RegisterForCoinUpdates,
    RegisterForPhUpdates, RemovalsResponse, RequestAdditions, RequestHeaderBlocks,
    RequestRemovals, RequestSesInfo, RespondSesInfo, RespondToCoinUpdates, RespondToPhUpdates,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Full node service as wired in these tests.
pub type FullNode = WalletProtocolService<InMemoryChainStore, ChannelPeerOutbound>;

/// Install the test subscriber once; later calls are no-ops.
pub fn init_test_logging() {
    let _ = init_logging(&TelemetryConfig::for_testing());
}

/// Encode to a frame and decode it again.
fn relay(message: ProtocolMessage) -> Result<ProtocolMessage, WalletSyncError> {
    let frame = message.to_frame()?;
    Ok(ProtocolMessage::from_frame(&frame)?)
}

fn unexpected(expected: &str, got: &ProtocolMessage) -> WalletSyncError {
    WalletSyncError::Protocol(ProtocolError::UnexpectedMessage {
        expected: expected.to_string(),
        got: format!("{:?}", got.message_type()),
    })
}

macro_rules! expect_message {
    ($message:expr, $variant:ident) => {
        match $message {
            ProtocolMessage::$variant(inner) => inner,
            other => return Err(unexpected(stringify!($variant), &other)),
        }
    };
}

/// A full node with its chain store and channel transport.
pub struct FullNodeHarness {
    /// Chain data
    pub store: Arc<InMemoryChainStore>,
    /// Per-peer push channels
    pub outbound: Arc<ChannelPeerOutbound>,
    /// Wallet protocol service
    pub node: Arc<FullNode>,
}

impl FullNodeHarness {
    /// A node holding only genesis.
    pub fn new(config: SubscriptionConfig) -> Result<Self, SubscriptionError> {
        let store = Arc::new(InMemoryChainStore::new());
        let outbound = Arc::new(ChannelPeerOutbound::new());
        let node = Arc::new(WalletProtocolService::new(config, store.clone(), outbound.clone())?);
        Ok(Self {
            store,
            outbound,
            node,
        })
    }

    /// Genesis block, the wallet's trusted anchor.
    pub fn genesis(&self) -> Result<HeaderBlock, SubscriptionError> {
        self.store
            .block_at(0)
            .ok_or(SubscriptionError::BlockNotFound { height: 0 })
    }

    /// Connect a wallet: returns its peer handle and push channel.
    pub fn connect(&self, id: PeerId) -> (Arc<LoopbackPeer>, UnboundedReceiver<ProtocolMessage>) {
        let rx = self.outbound.connect(id);
        let peer = Arc::new(LoopbackPeer {
            id,
            node: self.node.clone(),
            outbound: self.outbound.clone(),
            closed: AtomicBool::new(false),
            forged: Mutex::new(Vec::new()),
        });
        (peer, rx)
    }

    /// Append a block and notify subscribers.
    pub async fn add_block(
        &self,
        additions: &[(Coin, Option<Bytes32>)],
        removals: &[Bytes32],
        timestamp: u64,
    ) -> Result<BlockAdded, SubscriptionError> {
        let event = self.store.add_block(additions, removals, timestamp)?;
        self.node.on_block_added(&event).await;
        Ok(event)
    }

    /// Roll back to `fork_height` and notify subscribers.
    pub async fn reorg(&self, fork_height: Height) -> Result<ChainReorged, SubscriptionError> {
        let event = self.store.rollback_to(fork_height)?;
        self.node.on_reorg(&event).await;
        Ok(event)
    }

    /// Peak announcement for the current tip.
    pub fn announce(&self, fork_point: Height) -> Option<NewPeakWallet> {
        let peak = self.store.block_at(self.store.tip_height())?;
        Some(NewPeakWallet {
            header_hash: peak.header_hash,
            height: peak.height,
            weight: peak.weight,
            fork_point_with_previous_peak: fork_point,
        })
    }
}

/// Hand every pushed message waiting on `rx` to the wallet, via frames.
/// Returns the number of messages forwarded.
pub fn forward_messages<A: WalletSyncApi>(
    rx: &mut UnboundedReceiver<ProtocolMessage>,
    wallet: &A,
    peer: PeerId,
) -> Result<usize, WalletSyncError> {
    let mut forwarded = 0;
    while let Ok(message) = rx.try_recv() {
        match relay(message)? {
            ProtocolMessage::CoinStateUpdate(update) => wallet.on_coin_state_update(update, peer),
            ProtocolMessage::NewPeakWallet(peak) => wallet.on_new_peak(peak, peer),
            other => return Err(unexpected("CoinStateUpdate", &other)),
        }
        forwarded += 1;
    }
    Ok(forwarded)
}

/// Wallet-side connection to a [`FullNodeHarness`].
pub struct LoopbackPeer {
    id: PeerId,
    node: Arc<FullNode>,
    outbound: Arc<ChannelPeerOutbound>,
    closed: AtomicBool,
    forged: Mutex<Vec<CoinState>>,
}

impl LoopbackPeer {
    /// Append made-up states to every registration answer from now on.
    pub fn forge_states(&self, states: Vec<CoinState>) {
        *self.forged.lock() = states;
    }

    /// Whether the wallet closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), WalletSyncError> {
        if self.is_closed() {
            return Err(WalletSyncError::PeerClosed(self.id));
        }
        Ok(())
    }

    fn rejected(&self, error: SubscriptionError) -> WalletSyncError {
        WalletSyncError::PeerRejected {
            peer: self.id,
            reason: error.to_string(),
        }
    }

    fn with_forged(&self, mut states: Vec<CoinState>) -> Vec<CoinState> {
        states.extend(self.forged.lock().iter().copied());
        states
    }
}

#[async_trait]
impl FullNodePeer for LoopbackPeer {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    async fn register_for_ph_updates(
        &self,
        request: RegisterForPhUpdates,
    ) -> Result<RespondToPhUpdates, WalletSyncError> {
        self.ensure_open()?;
        let request = expect_message!(relay(ProtocolMessage::RegisterForPhUpdates(request))?, RegisterForPhUpdates);
        let response = self
            .node
            .register_for_ph_updates(self.id, request)
            .await
            .map_err(|e| self.rejected(e))?;
        let mut response = expect_message!(relay(ProtocolMessage::RespondToPhUpdates(response))?, RespondToPhUpdates);
        response.coin_states = self.with_forged(response.coin_states);
        Ok(response)
    }

    async fn register_for_coin_updates(
        &self,
        request: RegisterForCoinUpdates,
    ) -> Result<RespondToCoinUpdates, WalletSyncError> {
        self.ensure_open()?;
        let request = expect_message!(relay(ProtocolMessage::RegisterForCoinUpdates(request))?, RegisterForCoinUpdates);
        let response = self
            .node
            .register_for_coin_updates(self.id, request)
            .await
            .map_err(|e| self.rejected(e))?;
        let mut response = expect_message!(relay(ProtocolMessage::RespondToCoinUpdates(response))?, RespondToCoinUpdates);
        response.coin_states = self.with_forged(response.coin_states);
        Ok(response)
    }

    async fn request_additions(
        &self,
        request: RequestAdditions,
    ) -> Result<AdditionsResponse, WalletSyncError> {
        self.ensure_open()?;
        let request = expect_message!(relay(ProtocolMessage::RequestAdditions(request))?, RequestAdditions);
        let message = match self.node.request_additions(request).await.map_err(|e| self.rejected(e))? {
            AdditionsResponse::Respond(r) => ProtocolMessage::RespondAdditions(r),
            AdditionsResponse::Reject(r) => ProtocolMessage::RejectAdditionsRequest(r),
        };
        match relay(message)? {
            ProtocolMessage::RespondAdditions(r) => Ok(AdditionsResponse::Respond(r)),
            ProtocolMessage::RejectAdditionsRequest(r) => Ok(AdditionsResponse::Reject(r)),
            other => Err(unexpected("RespondAdditions", &other)),
        }
    }

    async fn request_removals(
        &self,
        request: RequestRemovals,
    ) -> Result<RemovalsResponse, WalletSyncError> {
        self.ensure_open()?;
        let request = expect_message!(relay(ProtocolMessage::RequestRemovals(request))?, RequestRemovals);
        let message = match self.node.request_removals(request).await.map_err(|e| self.rejected(e))? {
            RemovalsResponse::Respond(r) => ProtocolMessage::RespondRemovals(r),
            RemovalsResponse::Reject(r) => ProtocolMessage::RejectRemovalsRequest(r),
        };
        match relay(message)? {
            ProtocolMessage::RespondRemovals(r) => Ok(RemovalsResponse::Respond(r)),
            ProtocolMessage::RejectRemovalsRequest(r) => Ok(RemovalsResponse::Reject(r)),
            other => Err(unexpected("RespondRemovals", &other)),
        }
    }

    async fn request_header_blocks(
        &self,
        request: RequestHeaderBlocks,
    ) -> Result<HeaderBlocksResponse, WalletSyncError> {
        self.ensure_open()?;
        let request = expect_message!(relay(ProtocolMessage::RequestHeaderBlocks(request))?, RequestHeaderBlocks);
        let message = match self
            .node
            .request_header_blocks(request)
            .await
            .map_err(|e| self.rejected(e))?
        {
            HeaderBlocksResponse::Respond(r) => ProtocolMessage::RespondHeaderBlocks(r),
            HeaderBlocksResponse::Reject(r) => ProtocolMessage::RejectHeaderBlocks(r),
        };
        match relay(message)? {
            ProtocolMessage::RespondHeaderBlocks(r) => Ok(HeaderBlocksResponse::Respond(r)),
            ProtocolMessage::RejectHeaderBlocks(r) => Ok(HeaderBlocksResponse::Reject(r)),
            other => Err(unexpected("RespondHeaderBlocks", &other)),
        }
    }

    async fn request_ses_info(
        &self,
        _request: RequestSesInfo,
    ) -> Result<RespondSesInfo, WalletSyncError> {
        self.ensure_open()?;
        Err(WalletSyncError::PeerRejected {
            peer: self.id,
            reason: "sub-epoch summaries not served".to_string(),
        })
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.node.on_peer_disconnected(self.id).await;
        self.outbound.disconnect(&self.id);
    }
}
