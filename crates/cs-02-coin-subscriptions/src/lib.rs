//! # CS-02 Coin Subscriptions
//!
//! Full-node side of the light wallet protocol.
//!
//! **Subsystem ID:** 02
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Wallets register interest in puzzle hashes and coin ids. The full node
//! answers each registration with the matching history, then pushes a
//! `CoinStateUpdate` to every interested peer whenever a new peak or a
//! reorg changes one of those coins. Wallets can also ask for the coins a
//! block created or spent, together with Merkle Set proofs against the
//! block's committed roots.
//!
//! ## Limits
//!
//! | Limit | Default | Trusted peers |
//! |-------|---------|---------------|
//! | Subscriptions per peer | 200 000 | 2 000 000 |
//! | Coin states per registration response | 100 000 | 500 000 |
//! | Header blocks per request | 129 | 129 |
//!
//! A registration that would exceed the cap is accepted up to the cap; the
//! remaining keys are dropped silently.
//!
//! ## Module Structure
//!
//! ```text
//! cs-02-coin-subscriptions/
//! ├── domain/          # Registry, chain events, errors
//! ├── ports/           # Wallet protocol API (inbound) + stores/transport (outbound)
//! ├── application/     # WalletProtocolService, CoinStateNotifier
//! ├── adapters/        # In-memory chain store, channel transport
//! ├── metrics.rs       # Counters
//! └── config.rs        # SubscriptionConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod ports;

// Re-exports
pub use adapters::{ChannelPeerOutbound, InMemoryChainStore};
pub use application::{CoinStateNotifier, WalletProtocolService};
pub use config::SubscriptionConfig;
pub use domain::{BlockAdded, ChainReorged, SubscriptionError, SubscriptionKind, SubscriptionRegistry};
pub use metrics::{NotifierMetrics, NotifierMetricsSnapshot};
pub use ports::{BlockStore, CoinStore, PeerOutbound, WalletProtocolApi};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
