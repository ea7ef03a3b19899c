//! # Domain Module
//!
//! Wallet-side queue, caches, trusted chain and errors.

pub mod errors;
pub mod new_peak_queue;
pub mod outcome;
pub mod peak_chain;
pub mod peer_request_cache;

pub use errors::*;
pub use new_peak_queue::*;
pub use outcome::*;
pub use peak_chain::*;
pub use peer_request_cache::*;
