//! # Wallet Protocol Messages
//!
//! Typed request/response payloads exchanged between a full node and a
//! light client, plus the frame codec that carries them.
//!
//! ## Binary encoding
//!
//! Payloads are encoded with `bincode` configured for:
//!
//! | Field kind | Encoding |
//! |------------|----------|
//! | `u8`/`u32`/`u64`/`u128` | fixed width, big-endian |
//! | `Bytes32` | 32 raw bytes, no prefix |
//! | `Vec<T>` / byte strings | u64 big-endian length, then elements |
//! | `Option<T>` | one tag byte (0 = None, 1 = Some), then the value |
//! | structs | fields in declaration order, no padding |
//!
//! A frame is `[u8 message type][u32 BE payload length][payload]`.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entities::{Bytes32, Coin, CoinState, HeaderBlock, Height};
use crate::errors::ProtocolError;

/// Largest payload a frame may declare (50 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Frame header: one type byte plus a u32 length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Maximum span of a single `RequestHeaderBlocks`.
pub const MAX_BLOCK_COUNT_PER_REQUEST: u32 = 128;

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .with_limit(MAX_PAYLOAD_SIZE as u64)
        .reject_trailing_bytes()
}

/// Encode a payload with the wire layout documented above.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    codec()
        .serialize(value)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a payload, rejecting trailing bytes.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(codec().deserialize(bytes)?)
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Subscribe to coins under the given puzzle hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterForPhUpdates {
    pub puzzle_hashes: Vec<Bytes32>,
    pub min_height: Height,
}

/// Backfill for a puzzle-hash registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondToPhUpdates {
    /// Echo of every requested puzzle hash.
    pub puzzle_hashes: Vec<Bytes32>,
    pub min_height: Height,
    /// States for newly subscribed keys only.
    pub coin_states: Vec<CoinState>,
}

/// Subscribe to specific coin ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterForCoinUpdates {
    pub coin_ids: Vec<Bytes32>,
    pub min_height: Height,
}

/// Backfill for a coin-id registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondToCoinUpdates {
    pub coin_ids: Vec<Bytes32>,
    pub min_height: Height,
    pub coin_states: Vec<CoinState>,
}

/// Server-pushed coin state changes.
///
/// `fork_height` is 0 for a plain block add. On a reorg it carries the height
/// of the common ancestor, and retracted coins appear with both heights unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinStateUpdate {
    pub height: Height,
    pub fork_height: Height,
    pub peak_hash: Bytes32,
    pub items: Vec<CoinState>,
}

impl CoinStateUpdate {
    /// Whether this update rolls back earlier state.
    ///
    /// Genesis carries no transactions, so a reorg back to height 0 retracts
    /// every coin it touches and is caught by the retraction check.
    pub fn is_reorg(&self) -> bool {
        self.fork_height > 0 || self.items.iter().any(CoinState::is_retracted)
    }
}

/// Announcement of a new peak to wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPeakWallet {
    pub header_hash: Bytes32,
    pub height: Height,
    pub weight: u128,
    pub fork_point_with_previous_peak: Height,
}

// =============================================================================
// ADDITIONS / REMOVALS
// =============================================================================

/// Coins added under one puzzle hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleHashCoins {
    pub puzzle_hash: Bytes32,
    pub coins: Vec<Coin>,
}

/// Proofs for one puzzle-hash group in the additions set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionProof {
    pub puzzle_hash: Bytes32,
    /// Inclusion or exclusion proof of the puzzle hash.
    pub puzzle_hash_proof: Vec<u8>,
    /// Inclusion proof of the coin-list hash, when coins exist.
    pub coin_list_proof: Option<Vec<u8>>,
}

/// A removal claim: the coin if it was removed, `None` if it was not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalEntry {
    pub coin_id: Bytes32,
    pub coin: Option<Coin>,
}

/// Inclusion or exclusion proof of a coin id in the removals set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalProof {
    pub coin_id: Bytes32,
    pub proof: Vec<u8>,
}

/// Ask for the coins removed in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRemovals {
    pub height: Height,
    pub header_hash: Bytes32,
    /// `None` asks for every removal and no proofs.
    pub coin_names: Option<Vec<Bytes32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondRemovals {
    pub height: Height,
    pub header_hash: Bytes32,
    pub coins: Vec<RemovalEntry>,
    pub proofs: Option<Vec<RemovalProof>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRemovalsRequest {
    pub height: Height,
    pub header_hash: Bytes32,
}

/// Ask for the coins added in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAdditions {
    pub height: Height,
    /// Resolved from `height` when absent.
    pub header_hash: Option<Bytes32>,
    /// `None` asks for every group and no proofs.
    pub puzzle_hashes: Option<Vec<Bytes32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondAdditions {
    pub height: Height,
    pub header_hash: Bytes32,
    pub coins: Vec<PuzzleHashCoins>,
    pub proofs: Option<Vec<AdditionProof>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectAdditionsRequest {
    pub height: Height,
    pub header_hash: Option<Bytes32>,
}

// =============================================================================
// HEADERS / SUB-EPOCH SUMMARIES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeaderBlocks {
    pub start_height: Height,
    pub end_height: Height,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondHeaderBlocks {
    pub start_height: Height,
    pub end_height: Height,
    pub header_blocks: Vec<HeaderBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectHeaderBlocks {
    pub start_height: Height,
    pub end_height: Height,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSesInfo {
    pub start_height: Height,
    pub end_height: Height,
}

/// Sub-epoch summary hashes and the heights each one covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondSesInfo {
    pub reward_chain_hash: Vec<Bytes32>,
    pub heights: Vec<Vec<Height>>,
}

// =============================================================================
// TYPED RESPONSES
// =============================================================================

/// Reply to `RequestAdditions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdditionsResponse {
    Respond(RespondAdditions),
    Reject(RejectAdditionsRequest),
}

/// Reply to `RequestRemovals`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalsResponse {
    Respond(RespondRemovals),
    Reject(RejectRemovalsRequest),
}

/// Reply to `RequestHeaderBlocks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderBlocksResponse {
    Respond(RespondHeaderBlocks),
    Reject(RejectHeaderBlocks),
}

impl From<AdditionsResponse> for ProtocolMessage {
    fn from(response: AdditionsResponse) -> Self {
        match response {
            AdditionsResponse::Respond(r) => ProtocolMessage::RespondAdditions(r),
            AdditionsResponse::Reject(r) => ProtocolMessage::RejectAdditionsRequest(r),
        }
    }
}

impl From<RemovalsResponse> for ProtocolMessage {
    fn from(response: RemovalsResponse) -> Self {
        match response {
            RemovalsResponse::Respond(r) => ProtocolMessage::RespondRemovals(r),
            RemovalsResponse::Reject(r) => ProtocolMessage::RejectRemovalsRequest(r),
        }
    }
}

impl From<HeaderBlocksResponse> for ProtocolMessage {
    fn from(response: HeaderBlocksResponse) -> Self {
        match response {
            HeaderBlocksResponse::Respond(r) => ProtocolMessage::RespondHeaderBlocks(r),
            HeaderBlocksResponse::Reject(r) => ProtocolMessage::RejectHeaderBlocks(r),
        }
    }
}

// =============================================================================
// FRAMING
// =============================================================================

/// Message type byte carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolMessageType {
    RegisterForPhUpdates = 1,
    RespondToPhUpdates = 2,
    RegisterForCoinUpdates = 3,
    RespondToCoinUpdates = 4,
    CoinStateUpdate = 5,
    NewPeakWallet = 6,
    RequestRemovals = 7,
    RespondRemovals = 8,
    RejectRemovalsRequest = 9,
    RequestAdditions = 10,
    RespondAdditions = 11,
    RejectAdditionsRequest = 12,
    RequestHeaderBlocks = 13,
    RespondHeaderBlocks = 14,
    RejectHeaderBlocks = 15,
    RequestSesInfo = 16,
    RespondSesInfo = 17,
}

impl TryFrom<u8> for ProtocolMessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ProtocolMessageType::*;
        Ok(match value {
            1 => RegisterForPhUpdates,
            2 => RespondToPhUpdates,
            3 => RegisterForCoinUpdates,
            4 => RespondToCoinUpdates,
            5 => CoinStateUpdate,
            6 => NewPeakWallet,
            7 => RequestRemovals,
            8 => RespondRemovals,
            9 => RejectRemovalsRequest,
            10 => RequestAdditions,
            11 => RespondAdditions,
            12 => RejectAdditionsRequest,
            13 => RequestHeaderBlocks,
            14 => RespondHeaderBlocks,
            15 => RejectHeaderBlocks,
            16 => RequestSesInfo,
            17 => RespondSesInfo,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

/// Every message of the wallet protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    RegisterForPhUpdates(RegisterForPhUpdates),
    RespondToPhUpdates(RespondToPhUpdates),
    RegisterForCoinUpdates(RegisterForCoinUpdates),
    RespondToCoinUpdates(RespondToCoinUpdates),
    CoinStateUpdate(CoinStateUpdate),
    NewPeakWallet(NewPeakWallet),
    RequestRemovals(RequestRemovals),
    RespondRemovals(RespondRemovals),
    RejectRemovalsRequest(RejectRemovalsRequest),
    RequestAdditions(RequestAdditions),
    RespondAdditions(RespondAdditions),
    RejectAdditionsRequest(RejectAdditionsRequest),
    RequestHeaderBlocks(RequestHeaderBlocks),
    RespondHeaderBlocks(RespondHeaderBlocks),
    RejectHeaderBlocks(RejectHeaderBlocks),
    RequestSesInfo(RequestSesInfo),
    RespondSesInfo(RespondSesInfo),
}

impl ProtocolMessage {
    /// Type byte for the frame header.
    pub fn message_type(&self) -> ProtocolMessageType {
        use ProtocolMessage as M;
        use ProtocolMessageType as T;
        match self {
            M::RegisterForPhUpdates(_) => T::RegisterForPhUpdates,
            M::RespondToPhUpdates(_) => T::RespondToPhUpdates,
            M::RegisterForCoinUpdates(_) => T::RegisterForCoinUpdates,
            M::RespondToCoinUpdates(_) => T::RespondToCoinUpdates,
            M::CoinStateUpdate(_) => T::CoinStateUpdate,
            M::NewPeakWallet(_) => T::NewPeakWallet,
            M::RequestRemovals(_) => T::RequestRemovals,
            M::RespondRemovals(_) => T::RespondRemovals,
            M::RejectRemovalsRequest(_) => T::RejectRemovalsRequest,
            M::RequestAdditions(_) => T::RequestAdditions,
            M::RespondAdditions(_) => T::RespondAdditions,
            M::RejectAdditionsRequest(_) => T::RejectAdditionsRequest,
            M::RequestHeaderBlocks(_) => T::RequestHeaderBlocks,
            M::RespondHeaderBlocks(_) => T::RespondHeaderBlocks,
            M::RejectHeaderBlocks(_) => T::RejectHeaderBlocks,
            M::RequestSesInfo(_) => T::RequestSesInfo,
            M::RespondSesInfo(_) => T::RespondSesInfo,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>, ProtocolError> {
        use ProtocolMessage as M;
        match self {
            M::RegisterForPhUpdates(m) => encode_payload(m),
            M::RespondToPhUpdates(m) => encode_payload(m),
            M::RegisterForCoinUpdates(m) => encode_payload(m),
            M::RespondToCoinUpdates(m) => encode_payload(m),
            M::CoinStateUpdate(m) => encode_payload(m),
            M::NewPeakWallet(m) => encode_payload(m),
            M::RequestRemovals(m) => encode_payload(m),
            M::RespondRemovals(m) => encode_payload(m),
            M::RejectRemovalsRequest(m) => encode_payload(m),
            M::RequestAdditions(m) => encode_payload(m),
            M::RespondAdditions(m) => encode_payload(m),
            M::RejectAdditionsRequest(m) => encode_payload(m),
            M::RequestHeaderBlocks(m) => encode_payload(m),
            M::RespondHeaderBlocks(m) => encode_payload(m),
            M::RejectHeaderBlocks(m) => encode_payload(m),
            M::RequestSesInfo(m) => encode_payload(m),
            M::RespondSesInfo(m) => encode_payload(m),
        }
    }

    fn decode_body(kind: ProtocolMessageType, body: &[u8]) -> Result<Self, ProtocolError> {
        use ProtocolMessage as M;
        use ProtocolMessageType as T;
        Ok(match kind {
            T::RegisterForPhUpdates => M::RegisterForPhUpdates(decode_payload(body)?),
            T::RespondToPhUpdates => M::RespondToPhUpdates(decode_payload(body)?),
            T::RegisterForCoinUpdates => M::RegisterForCoinUpdates(decode_payload(body)?),
            T::RespondToCoinUpdates => M::RespondToCoinUpdates(decode_payload(body)?),
            T::CoinStateUpdate => M::CoinStateUpdate(decode_payload(body)?),
            T::NewPeakWallet => M::NewPeakWallet(decode_payload(body)?),
            T::RequestRemovals => M::RequestRemovals(decode_payload(body)?),
            T::RespondRemovals => M::RespondRemovals(decode_payload(body)?),
            T::RejectRemovalsRequest => M::RejectRemovalsRequest(decode_payload(body)?),
            T::RequestAdditions => M::RequestAdditions(decode_payload(body)?),
            T::RespondAdditions => M::RespondAdditions(decode_payload(body)?),
            T::RejectAdditionsRequest => M::RejectAdditionsRequest(decode_payload(body)?),
            T::RequestHeaderBlocks => M::RequestHeaderBlocks(decode_payload(body)?),
            T::RespondHeaderBlocks => M::RespondHeaderBlocks(decode_payload(body)?),
            T::RejectHeaderBlocks => M::RejectHeaderBlocks(decode_payload(body)?),
            T::RequestSesInfo => M::RequestSesInfo(decode_payload(body)?),
            T::RespondSesInfo => M::RespondSesInfo(decode_payload(body)?),
        })
    }

    /// Encode as a length-prefixed frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = self.encode_body()?;
        if body.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: body.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        frame.push(self.message_type() as u8);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode exactly one frame.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(ProtocolError::Truncated {
                expected: FRAME_HEADER_LEN,
                got: frame.len(),
            });
        }
        let kind = ProtocolMessageType::try_from(frame[0])?;
        let declared = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        if declared > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: declared,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let body = &frame[FRAME_HEADER_LEN..];
        if body.len() < declared {
            return Err(ProtocolError::Truncated {
                expected: FRAME_HEADER_LEN + declared,
                got: frame.len(),
            });
        }
        if body.len() > declared {
            return Err(ProtocolError::TrailingBytes(body.len() - declared));
        }
        Self::decode_body(kind, body)
    }
}
