//! # Core Domain Entities
//!
//! Identifiers and ledger entities shared by the full node and the wallet.
//!
//! ## Clusters
//!
//! - **Identifiers**: `Bytes32`, `PeerId`, `std_hash`
//! - **Coins**: `Coin`, `CoinState`, `CoinRecord`
//! - **Chain**: `HeaderBlock`, `TransactionsInfo`

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::errors::IdentifierError;

/// Width of every identifier, hash and root.
pub const BYTES32_LEN: usize = 32;

// =============================================================================
// CLUSTER A: IDENTIFIERS
// =============================================================================

/// A fixed 32-byte value: coin id, puzzle hash, header hash or Merkle root.
///
/// Serializes as 32 raw bytes in binary formats and as a hex string in
/// human-readable formats (configuration files).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Bytes32(pub [u8; BYTES32_LEN]);

impl Bytes32 {
    /// The all-zero value (root of the empty set).
    pub const ZERO: Bytes32 = Bytes32([0u8; BYTES32_LEN]);

    /// Wrap raw bytes.
    pub const fn new(bytes: [u8; BYTES32_LEN]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; BYTES32_LEN] {
        &self.0
    }

    /// Convert a byte slice, rejecting anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdentifierError> {
        if bytes.is_empty() {
            return Err(IdentifierError::Empty);
        }
        let array: [u8; BYTES32_LEN] =
            bytes
                .try_into()
                .map_err(|_| IdentifierError::InvalidLength {
                    expected: BYTES32_LEN,
                    got: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Parse a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, IdentifierError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| IdentifierError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Lowercase hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; BYTES32_LEN]> for Bytes32 {
    fn from(bytes: [u8; BYTES32_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Bytes32 {
    type Error = IdentifierError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_slice(bytes)
    }
}

impl AsRef<[u8]> for Bytes32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Bytes32::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            <[u8; BYTES32_LEN]>::deserialize(deserializer).map(Bytes32)
        }
    }
}

/// Unique identifier for a connected peer (hash of its certificate).
pub type PeerId = Bytes32;

/// Block height.
pub type Height = u32;

/// SHA-256 of arbitrary bytes.
pub fn std_hash(data: impl AsRef<[u8]>) -> Bytes32 {
    Bytes32(Sha256::digest(data.as_ref()).into())
}

// =============================================================================
// CLUSTER B: COINS
// =============================================================================

/// The unit of value in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coin {
    /// Id of the coin that created this one.
    pub parent_coin_info: Bytes32,
    /// Hash of the coin's spending condition.
    pub puzzle_hash: Bytes32,
    /// Value in the smallest unit.
    pub amount: u64,
}

impl Coin {
    /// Create a coin.
    pub fn new(parent_coin_info: Bytes32, puzzle_hash: Bytes32, amount: u64) -> Self {
        Self {
            parent_coin_info,
            puzzle_hash,
            amount,
        }
    }

    /// The coin id: `sha256(parent || puzzle_hash || amount_bytes)`.
    pub fn coin_id(&self) -> Bytes32 {
        let mut hasher = Sha256::new();
        hasher.update(self.parent_coin_info.as_bytes());
        hasher.update(self.puzzle_hash.as_bytes());
        hasher.update(amount_bytes(self.amount));
        Bytes32(hasher.finalize().into())
    }
}

/// Minimal big-endian two's-complement encoding of a non-negative amount.
///
/// Zero encodes as no bytes; a leading zero byte is kept when the high bit
/// of the first significant byte is set.
fn amount_bytes(amount: u64) -> Vec<u8> {
    let bytes = amount.to_be_bytes();
    let Some(first) = bytes.iter().position(|b| *b != 0) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(9);
    if bytes[first] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[first..]);
    out
}

/// The observable status of a coin as reported to wallets.
///
/// Both heights `None` means the coin's previously reported status has been
/// retracted by a reorg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoinState {
    /// The coin.
    pub coin: Coin,
    /// Height of the block that created the coin.
    pub created_height: Option<Height>,
    /// Height of the block that spent the coin.
    pub spent_height: Option<Height>,
}

impl CoinState {
    /// Create a coin state.
    pub fn new(coin: Coin, created_height: Option<Height>, spent_height: Option<Height>) -> Self {
        Self {
            coin,
            created_height,
            spent_height,
        }
    }

    /// A retraction: the coin's earlier status no longer holds.
    pub fn retracted(coin: Coin) -> Self {
        Self::new(coin, None, None)
    }

    /// True when neither height is set.
    pub fn is_retracted(&self) -> bool {
        self.created_height.is_none() && self.spent_height.is_none()
    }

    /// Height of the most recent change: spend if any, else creation.
    pub fn last_change_height(&self) -> Option<Height> {
        self.spent_height.or(self.created_height)
    }

    /// SHA-256 over the canonical encoding of this state.
    ///
    /// Field order matches the wire layout: coin, then `created_height`, then
    /// `spent_height`, each optional as a tag byte plus a big-endian u32.
    pub fn state_hash(&self) -> Bytes32 {
        let mut hasher = Sha256::new();
        hasher.update(self.coin.parent_coin_info.as_bytes());
        hasher.update(self.coin.puzzle_hash.as_bytes());
        hasher.update(self.coin.amount.to_be_bytes());
        for height in [self.created_height, self.spent_height] {
            match height {
                Some(h) => {
                    hasher.update([1u8]);
                    hasher.update(h.to_be_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        Bytes32(hasher.finalize().into())
    }
}

/// A full node's record of a coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoinRecord {
    /// The coin.
    pub coin: Coin,
    /// Height of the creating block.
    pub confirmed_block_index: Height,
    /// Height of the spending block, 0 while unspent.
    pub spent_block_index: Height,
    /// Whether the coin is a block reward.
    pub coinbase: bool,
    /// Timestamp of the creating block.
    pub timestamp: u64,
}

impl CoinRecord {
    /// Create an unspent record.
    pub fn new(coin: Coin, confirmed_block_index: Height, timestamp: u64) -> Self {
        Self {
            coin,
            confirmed_block_index,
            spent_block_index: 0,
            coinbase: false,
            timestamp,
        }
    }

    /// The coin id.
    pub fn name(&self) -> Bytes32 {
        self.coin.coin_id()
    }

    /// Whether a spend has been recorded.
    pub fn is_spent(&self) -> bool {
        self.spent_block_index != 0
    }

    /// The state wallets see for this record.
    pub fn coin_state(&self) -> CoinState {
        let spent = self.is_spent().then_some(self.spent_block_index);
        CoinState::new(self.coin, Some(self.confirmed_block_index), spent)
    }
}

// =============================================================================
// CLUSTER C: CHAIN
// =============================================================================

/// Commitments carried by transaction blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionsInfo {
    /// Merkle Set root over `(puzzle_hash, hash_coin_ids(coins))` pairs.
    pub additions_root: Bytes32,
    /// Merkle Set root over removed coin ids.
    pub removals_root: Bytes32,
    /// Block timestamp.
    pub timestamp: u64,
}

/// The light-client view of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderBlock {
    /// Block height.
    pub height: Height,
    /// Hash of this block's header.
    pub header_hash: Bytes32,
    /// Hash of the previous block's header.
    pub prev_header_hash: Bytes32,
    /// Cumulative chain weight.
    pub weight: u128,
    /// Present only for transaction blocks.
    pub transactions_info: Option<TransactionsInfo>,
}

impl HeaderBlock {
    /// Whether the block carries additions/removals commitments.
    pub fn is_transaction_block(&self) -> bool {
        self.transactions_info.is_some()
    }

    /// Block timestamp, if this is a transaction block.
    pub fn timestamp(&self) -> Option<u64> {
        self.transactions_info.map(|info| info.timestamp)
    }
}
