//! # Ports
//!
//! Inbound API (wallet sync) and outbound dependencies (full node peers,
//! wallet coin store).

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
