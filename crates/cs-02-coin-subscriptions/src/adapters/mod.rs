//! # Adapters
//!
//! In-process implementations of the outbound ports: an in-memory chain
//! store and a channel-backed peer transport.

pub mod channel_outbound;
pub mod memory_store;

pub use channel_outbound::ChannelPeerOutbound;
pub use memory_store::InMemoryChainStore;
