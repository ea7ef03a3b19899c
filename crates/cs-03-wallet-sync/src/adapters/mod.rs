//! # Adapters
//!
//! In-memory wallet coin store.

pub mod memory_wallet_store;

pub use memory_wallet_store::InMemoryWalletStore;
