//! # Error Types
//!
//! Defines error types shared by the full node and wallet sides.

use thiserror::Error;

/// Errors raised when raw bytes are turned into a fixed-width identifier.
///
/// These indicate a programming or framing bug, never adversarial data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// An identifier with no bytes at all.
    #[error("Empty identifier")]
    Empty,

    /// An identifier whose length is not exactly 32 bytes.
    #[error("Invalid identifier length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    /// A hex string that does not decode to an identifier.
    #[error("Invalid hex identifier: {0}")]
    InvalidHex(String),
}

/// Errors from encoding or decoding wallet-protocol frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload serialization failed.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Payload deserialization failed.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Frame carries a message type this node does not know.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Frame is shorter than its header or declared payload.
    #[error("Truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// Frame has bytes after the declared payload.
    #[error("Trailing bytes after frame: {0}")]
    TrailingBytes(usize),

    /// Declared payload exceeds the frame limit.
    #[error("Payload too large: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// A response of the wrong type arrived for a request.
    #[error("Unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage { expected: String, got: String },
}

impl From<bincode::Error> for ProtocolError {
    fn from(err: bincode::Error) -> Self {
        ProtocolError::Decode(err.to_string())
    }
}
