//! # CS-03 Wallet Sync
//!
//! Light wallet side of the coin subscription protocol.
//!
//! **Subsystem ID:** 03
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! The wallet subscribes to puzzle hashes and coin ids on one or more full
//! nodes and keeps a local coin store that only ever holds states it has
//! proven. Every state is checked against the additions and removals roots
//! of header blocks that link to the wallet's trusted chain.
//!
//! ## Processing Order
//!
//! All work goes through one [`NewPeakQueue`]: coin id subscriptions first,
//! then puzzle hash subscriptions, then pushed state updates by height, then
//! peak announcements by height.
//!
//! ## Peer Handling
//!
//! | Failure | Action |
//! |---------|--------|
//! | Request timeout | Close peer, try next candidate |
//! | Proof does not validate | Close peer, reject remaining states |
//! | Headers do not link | Close peer |
//! | Announced hash not on served chain | Close peer |
//!
//! ## Module Structure
//!
//! ```text
//! cs-03-wallet-sync/
//! ├── domain/          # NewPeakQueue, PeerRequestCache, PeakChain, errors
//! ├── algorithms/      # Header batch checks, fork point search
//! ├── ports/           # Wallet sync API (inbound) + full node/coin store (outbound)
//! ├── application/     # WalletSyncService
//! ├── adapters/        # In-memory wallet store
//! └── config.rs        # WalletSyncConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports
pub use adapters::InMemoryWalletStore;
pub use algorithms::{find_fork_point, validate_header_batch};
pub use application::WalletSyncService;
pub use config::WalletSyncConfig;
pub use domain::{
    can_use_peer_request_cache, BlockRequest, NewPeakItem, NewPeakQueue, NewPeakQueueClass,
    PeakChain, PeerRequestCache, SyncOutcome, WalletSyncError,
};
pub use ports::{FullNodePeer, MockFullNodePeer, WalletCoinStore, WalletSyncApi};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
