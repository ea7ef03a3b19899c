//! # Application Module
//!
//! The wallet protocol service and the coin state notifier it drives.

pub mod notifier;
pub mod service;

pub use notifier::CoinStateNotifier;
pub use service::WalletProtocolService;
