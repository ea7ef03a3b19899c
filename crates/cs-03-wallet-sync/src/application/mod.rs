//! # Application Module
//!
//! The wallet sync service.

pub mod service;

pub use service::WalletSyncService;
