//! # Domain Module
//!
//! Subscription bookkeeping, chain events and errors for the full node.

pub mod errors;
pub mod events;
pub mod registry;

pub use errors::*;
pub use events::*;
pub use registry::*;
