//! # Peak Chain
//!
//! The wallet's trusted chain of header blocks: a trusted anchor followed by
//! blocks that each link to their predecessor.

use shared_types::{Bytes32, HeaderBlock, Height};

use crate::domain::WalletSyncError;

/// Linked header blocks from the anchor up to the wallet's peak.
#[derive(Debug, Clone)]
pub struct PeakChain {
    /// `blocks[i]` is at height `anchor_height + i`; never empty.
    blocks: Vec<HeaderBlock>,
    anchor_height: Height,
}

impl PeakChain {
    /// Start a chain from a trusted anchor block.
    pub fn new(anchor: HeaderBlock) -> Self {
        Self {
            anchor_height: anchor.height,
            blocks: vec![anchor],
        }
    }

    /// Height of the anchor; the chain never rolls back below it.
    pub fn anchor_height(&self) -> Height {
        self.anchor_height
    }

    /// Current peak.
    pub fn peak(&self) -> &HeaderBlock {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Current peak height.
    pub fn height(&self) -> Height {
        self.peak().height
    }

    /// Block at `height`, if the chain reaches it.
    pub fn block_at(&self, height: Height) -> Option<&HeaderBlock> {
        let index = height.checked_sub(self.anchor_height)?;
        self.blocks.get(index as usize)
    }

    /// Header hash at `height`.
    pub fn hash_at(&self, height: Height) -> Option<Bytes32> {
        self.block_at(height).map(|b| b.header_hash)
    }

    /// Whether `block` is the chain's block at its height.
    pub fn contains(&self, block: &HeaderBlock) -> bool {
        self.hash_at(block.height) == Some(block.header_hash)
    }

    /// Append one block on top of the peak.
    ///
    /// # Errors
    /// - `InvalidHeaderChain` if the block does not link to the peak
    pub fn append(&mut self, block: HeaderBlock) -> Result<(), WalletSyncError> {
        let peak = self.peak();
        if block.prev_header_hash != peak.header_hash {
            return Err(WalletSyncError::InvalidHeaderChain(format!(
                "block {} at height {} does not link to peak {}",
                block.header_hash, block.height, peak.header_hash
            )));
        }
        if block.height != peak.height + 1 {
            return Err(WalletSyncError::InvalidHeaderChain(format!(
                "height gap: expected {}, got {}",
                peak.height + 1,
                block.height
            )));
        }
        if block.weight <= peak.weight {
            return Err(WalletSyncError::InvalidHeaderChain(format!(
                "weight does not increase at height {}",
                block.height
            )));
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Drop every block above `height` (not below the anchor). Returns the
    /// number of blocks removed.
    pub fn rollback_to(&mut self, height: Height) -> usize {
        let keep = height.saturating_sub(self.anchor_height) as usize + 1;
        let removed = self.blocks.len().saturating_sub(keep);
        self.blocks.truncate(keep.max(1));
        removed
    }
}
