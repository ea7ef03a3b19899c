//! # Coinset-Sync Test Suite
//!
//! Cross-crate tests that run a full node (cs-02) and a wallet (cs-03)
//! against each other.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/
//! │   ├── loopback.rs   # FullNodePeer over an in-process full node, via wire frames
//! │   └── flows.rs      # Subscription, notification and reorg flows
//! └── benches/          # Merkle Set build/prove/verify
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p cs-tests
//! cargo bench -p cs-tests
//! ```

pub mod integration;
