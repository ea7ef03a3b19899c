//! # Ports
//!
//! Inbound API (wallet protocol) and outbound dependencies (coin store,
//! block store, peer transport).

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
