//! # Peer Request Cache
//!
//! LRU caches that spare the wallet repeated round trips to full nodes.
//!
//! Every entry carries a height. After a reorg, `clear_after_height` drops
//! every entry above the fork point so a stale answer is never served past
//! it.

use futures::future::{BoxFuture, Shared};
use lru::LruCache;
use shared_types::{Bytes32, CoinState, HeaderBlock, Height, RespondSesInfo};
use std::hash::Hash;
use std::num::NonZeroUsize;

use crate::config::WalletSyncConfig;
use crate::domain::WalletSyncError;

/// An in-flight header range request that several callers can await.
pub type BlockRequest = Shared<BoxFuture<'static, Result<Vec<HeaderBlock>, WalletSyncError>>>;

/// Per-wallet request cache.
pub struct PeerRequestCache {
    blocks: LruCache<Height, HeaderBlock>,
    block_requests: LruCache<(Height, Height), BlockRequest>,
    ses_requests: LruCache<Height, RespondSesInfo>,
    states_validated: LruCache<Bytes32, Option<Height>>,
    timestamps: LruCache<Height, u64>,
    blocks_validated: LruCache<Bytes32, Height>,
}

fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

/// Rebuild `cache` with only the entries `keep` accepts, preserving recency.
fn retain<K: Hash + Eq, V>(cache: &mut LruCache<K, V>, keep: impl Fn(&K, &V) -> bool) {
    let mut rebuilt = LruCache::new(cache.cap());
    while let Some((k, v)) = cache.pop_lru() {
        if keep(&k, &v) {
            rebuilt.put(k, v);
        }
    }
    *cache = rebuilt;
}

impl PeerRequestCache {
    /// Create empty caches sized by `config`.
    pub fn new(config: &WalletSyncConfig) -> Self {
        Self {
            blocks: LruCache::new(capacity(config.block_cache_size)),
            block_requests: LruCache::new(capacity(config.block_request_cache_size)),
            ses_requests: LruCache::new(capacity(config.ses_cache_size)),
            states_validated: LruCache::new(capacity(config.states_validated_cache_size)),
            timestamps: LruCache::new(capacity(config.timestamp_cache_size)),
            blocks_validated: LruCache::new(capacity(config.blocks_validated_cache_size)),
        }
    }

    /// Header block at `height`.
    pub fn get_block(&mut self, height: Height) -> Option<HeaderBlock> {
        self.blocks.get(&height).cloned()
    }

    /// Cache a header block, and its timestamp if it is a transaction block.
    pub fn add_to_blocks(&mut self, block: HeaderBlock) {
        if let Some(timestamp) = block.timestamp() {
            self.timestamps.put(block.height, timestamp);
        }
        self.blocks.put(block.height, block);
    }

    /// In-flight or finished request for `start..=end`.
    pub fn get_block_request(&mut self, start: Height, end: Height) -> Option<BlockRequest> {
        self.block_requests.get(&(start, end)).cloned()
    }

    /// Remember a request so concurrent callers share it.
    pub fn add_to_block_requests(&mut self, start: Height, end: Height, request: BlockRequest) {
        self.block_requests.put((start, end), request);
    }

    /// Forget a request, typically because it failed.
    pub fn remove_block_request(&mut self, start: Height, end: Height) {
        self.block_requests.pop(&(start, end));
    }

    /// Sub-epoch-summary response requested at `height`.
    pub fn get_ses_request(&mut self, height: Height) -> Option<RespondSesInfo> {
        self.ses_requests.get(&height).cloned()
    }

    /// Cache a sub-epoch-summary response.
    pub fn add_to_ses_requests(&mut self, height: Height, response: RespondSesInfo) {
        self.ses_requests.put(height, response);
    }

    /// Whether a state with this hash already passed validation.
    pub fn in_states_validated(&mut self, state_hash: &Bytes32) -> bool {
        self.states_validated.get(state_hash).is_some()
    }

    /// Record a validated state under its hash and last change height.
    pub fn add_to_states_validated(&mut self, state: &CoinState) {
        self.states_validated
            .put(state.state_hash(), state.last_change_height());
    }

    /// Timestamp of the transaction block at `height`.
    pub fn get_height_timestamp(&mut self, height: Height) -> Option<u64> {
        self.timestamps.get(&height).copied()
    }

    /// Cache a block timestamp.
    pub fn add_to_timestamps(&mut self, height: Height, timestamp: u64) {
        self.timestamps.put(height, timestamp);
    }

    /// Whether this header hash was already linked to the trusted chain.
    pub fn in_blocks_validated(&mut self, header_hash: &Bytes32) -> bool {
        self.blocks_validated.get(header_hash).is_some()
    }

    /// Record a header hash linked to the trusted chain.
    pub fn add_to_blocks_validated(&mut self, header_hash: Bytes32, height: Height) {
        self.blocks_validated.put(header_hash, height);
    }

    /// Drop every entry above `height`.
    ///
    /// Range requests survive only if both ends are at or below `height`;
    /// validated states without a height belong to a reorg in progress and
    /// are dropped too.
    pub fn clear_after_height(&mut self, height: Height) {
        retain(&mut self.blocks, |h, _| *h <= height);
        retain(&mut self.block_requests, |(start, end), _| {
            *start <= height && *end <= height
        });
        retain(&mut self.ses_requests, |h, _| *h <= height);
        retain(&mut self.states_validated, |_, h| h.is_some_and(|h| h <= height));
        retain(&mut self.timestamps, |h, _| *h <= height);
        retain(&mut self.blocks_validated, |_, h| *h <= height);
    }
}

/// Whether `state` may be accepted from the validation cache.
///
/// It must have been validated before. During a reorg (`fork_height` set)
/// its heights must also lie at or below the fork point. A retracted state
/// is never served from cache.
pub fn can_use_peer_request_cache(
    state: &CoinState,
    cache: &mut PeerRequestCache,
    fork_height: Option<Height>,
) -> bool {
    if state.is_retracted() || !cache.in_states_validated(&state.state_hash()) {
        return false;
    }
    let Some(fork_height) = fork_height else {
        return true;
    };
    state.created_height.map_or(true, |h| h <= fork_height)
        && state.spent_height.map_or(true, |h| h <= fork_height)
}
