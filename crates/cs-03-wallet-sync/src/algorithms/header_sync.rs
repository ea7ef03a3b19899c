//! # Header Sync
//!
//! Continuity checks for header block batches served by a peer.

use shared_types::{HeaderBlock, Height};

use crate::domain::{PeakChain, WalletSyncError};

/// Validate a batch of header blocks for chain continuity.
///
/// # Checks
/// 1. Parent hash continuity
/// 2. Height increment
/// 3. Weight progression
pub fn validate_header_batch(headers: &[HeaderBlock]) -> Result<(), WalletSyncError> {
    for window in headers.windows(2) {
        let prev = &window[0];
        let curr = &window[1];

        // 1. Parent hash continuity
        if curr.prev_header_hash != prev.header_hash {
            return Err(WalletSyncError::InvalidHeaderChain(format!(
                "broken chain at height {}: expected parent {}, got {}",
                curr.height, prev.header_hash, curr.prev_header_hash
            )));
        }

        // 2. Height increment
        if curr.height != prev.height + 1 {
            return Err(WalletSyncError::InvalidHeaderChain(format!(
                "height gap at {}: expected {}",
                curr.height,
                prev.height + 1
            )));
        }

        // 3. Weight progression
        if curr.weight <= prev.weight {
            return Err(WalletSyncError::InvalidHeaderChain(format!(
                "weight not increasing at height {}",
                curr.height
            )));
        }
    }

    Ok(())
}

/// Highest height at which `remote` agrees with the local chain.
///
/// `remote` must be sorted by height.
pub fn find_fork_point(local: &PeakChain, remote: &[HeaderBlock]) -> Option<Height> {
    remote
        .iter()
        .rev()
        .find(|block| local.contains(block))
        .map(|block| block.height)
}
