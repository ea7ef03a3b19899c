//! # Integration
//!
//! Full node and wallet wired together in-process.

pub mod loopback;

mod flows;

pub use loopback::{forward_messages, init_test_logging, FullNodeHarness, LoopbackPeer};
