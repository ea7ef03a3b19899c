//! # Merkle Set Nodes
//!
//! Node variants and the tagged hash combination shared by set
//! construction and proof verification.

use sha2::{Digest, Sha256};
use shared_types::Bytes32;

/// Deepest level at which a Middle node can branch (one level per id bit).
pub const MAX_DEPTH: usize = 256;

/// Type byte mixed into every Middle hash and used as the proof tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    /// No elements below.
    Empty = 0,
    /// Exactly one element below.
    Terminal = 1,
    /// Two or more elements below.
    Middle = 2,
    /// A Middle subtree carried only by its hash (proofs only).
    Truncated = 3,
}

impl NodeType {
    /// Parse a proof tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(NodeType::Empty),
            1 => Some(NodeType::Terminal),
            2 => Some(NodeType::Middle),
            3 => Some(NodeType::Truncated),
            _ => None,
        }
    }
}

/// A node stored in a [`Tree`](crate::domain::Tree) arena.
///
/// Children are arena indices, so deep trees never recurse on the call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    /// No elements.
    Empty,
    /// A single element.
    Terminal(Bytes32),
    /// An internal branch with its precomputed hash.
    Middle {
        /// Arena index of the subtree for bit 0.
        left: usize,
        /// Arena index of the subtree for bit 1.
        right: usize,
        /// `hash_middle` of the two children.
        hash: Bytes32,
    },
    /// A Middle subtree known only by hash.
    Truncated(Bytes32),
}

impl Node {
    /// The type byte this node contributes to its parent's hash.
    ///
    /// A truncated subtree stands in for a Middle node.
    pub fn hash_type(&self) -> NodeType {
        match self {
            Node::Empty => NodeType::Empty,
            Node::Terminal(_) => NodeType::Terminal,
            Node::Middle { .. } | Node::Truncated(_) => NodeType::Middle,
        }
    }

    /// The hash this node contributes to its parent's hash.
    pub fn hash(&self) -> Bytes32 {
        match self {
            Node::Empty => Bytes32::ZERO,
            Node::Terminal(id) => *id,
            Node::Middle { hash, .. } => *hash,
            Node::Truncated(hash) => *hash,
        }
    }
}

/// `sha256(0x00*30 ‖ typeL ‖ typeR ‖ hashL ‖ hashR)`
pub fn hash_middle(left: &Node, right: &Node) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update([0u8; 30]);
    hasher.update([left.hash_type() as u8, right.hash_type() as u8]);
    hasher.update(left.hash().as_bytes());
    hasher.update(right.hash().as_bytes());
    Bytes32(hasher.finalize().into())
}

/// Root of a set holding exactly one element: `sha256(0x01 ‖ id)`.
pub fn hash_single(id: &Bytes32) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update([NodeType::Terminal as u8]);
    hasher.update(id.as_bytes());
    Bytes32(hasher.finalize().into())
}

/// Bit `depth` of `id`, most significant bit of byte 0 first.
///
/// `depth` must be below [`MAX_DEPTH`].
pub fn get_bit(id: &Bytes32, depth: usize) -> bool {
    (id.0[depth / 8] >> (7 - depth % 8)) & 1 == 1
}
