//! # Proof Codec
//!
//! A proof is the pre-order serialization of the tree pruned to one path:
//!
//! | Tag | Payload | Meaning |
//! |-----|---------|---------|
//! | `0x00` | - | Empty |
//! | `0x01` | 32-byte id | Terminal |
//! | `0x02` | left subtree, right subtree | Middle |
//! | `0x03` | 32-byte hash | Middle subtree known only by hash |
//!
//! Confirming a proof rebuilds the pruned tree, recomputes its root with the
//! same tagged hashing used to build sets, and walks the queried id's path.

use crate::domain::{hash_middle, Lookup, MerkleSetError, Node, NodeType, Tree, MAX_DEPTH};
use shared_types::{Bytes32, BYTES32_LEN};

/// Append the proof encoding of an off-path sibling.
pub(crate) fn write_sibling(proof: &mut Vec<u8>, node: &Node) {
    match node {
        Node::Empty => proof.push(NodeType::Empty as u8),
        Node::Terminal(id) => {
            proof.push(NodeType::Terminal as u8);
            proof.extend_from_slice(id.as_bytes());
        }
        Node::Middle { hash, .. } | Node::Truncated(hash) => {
            proof.push(NodeType::Truncated as u8);
            proof.extend_from_slice(hash.as_bytes());
        }
    }
}

/// Decode proof bytes into a pruned tree.
///
/// Rejects unknown tags, truncated payloads, trailing bytes and nesting
/// deeper than one level per identifier bit.
pub fn decode_proof(bytes: &[u8]) -> Result<Tree, MerkleSetError> {
    let mut tree = Tree::with_capacity(bytes.len() / BYTES32_LEN + 1);
    // Open Middle nodes, holding the left child once it is complete.
    let mut open: Vec<Option<usize>> = Vec::new();
    let mut pos = 0;
    let mut root = None;

    while pos < bytes.len() {
        if root.is_some() {
            return Err(MerkleSetError::MalformedProof(format!(
                "{} trailing bytes",
                bytes.len() - pos
            )));
        }

        let tag = bytes[pos];
        pos += 1;
        let node_type = NodeType::from_tag(tag)
            .ok_or_else(|| MerkleSetError::MalformedProof(format!("unknown tag {tag}")))?;

        let mut complete = match node_type {
            NodeType::Middle => {
                if open.len() >= MAX_DEPTH {
                    return Err(MerkleSetError::MalformedProof(
                        "nesting deeper than 256 levels".to_string(),
                    ));
                }
                open.push(None);
                continue;
            }
            NodeType::Empty => tree.push(Node::Empty),
            NodeType::Terminal | NodeType::Truncated => {
                let end = pos + BYTES32_LEN;
                let payload = bytes.get(pos..end).ok_or_else(|| {
                    MerkleSetError::MalformedProof(format!("truncated node at offset {}", pos - 1))
                })?;
                pos = end;
                let hash = Bytes32::from_slice(payload)?;
                if node_type == NodeType::Terminal {
                    tree.push(Node::Terminal(hash))
                } else {
                    tree.push(Node::Truncated(hash))
                }
            }
        };

        // Close every Middle whose right child just completed.
        loop {
            let Some(top) = open.last_mut() else {
                root = Some(complete);
                break;
            };
            match *top {
                None => {
                    *top = Some(complete);
                    break;
                }
                Some(left) => {
                    open.pop();
                    let hash = hash_middle(tree.node(left), tree.node(complete));
                    complete = tree.push(Node::Middle {
                        left,
                        right: complete,
                        hash,
                    });
                }
            }
        }
    }

    match root {
        Some(root) => {
            tree.root = root;
            Ok(tree)
        }
        None => Err(MerkleSetError::MalformedProof("incomplete proof".to_string())),
    }
}

fn check_proof(root: &Bytes32, id: &Bytes32, proof: &[u8]) -> Option<Lookup> {
    match decode_proof(proof) {
        Ok(tree) if tree.root_hash() == *root => Some(tree.lookup(id)),
        Ok(_) => {
            tracing::debug!("[cs-01] proof root mismatch for {}", id);
            None
        }
        Err(e) => {
            tracing::debug!("[cs-01] rejecting proof for {}: {}", id, e);
            None
        }
    }
}

/// True iff `proof` proves `id` is a member of the set committed to by `root`.
///
/// Malformed proofs and root mismatches are `false`, never errors.
pub fn confirm_included(root: &Bytes32, id: &Bytes32, proof: &[u8]) -> bool {
    check_proof(root, id, proof) == Some(Lookup::Included)
}

/// True iff `proof` proves `id` is absent from the set committed to by `root`.
pub fn confirm_excluded(root: &Bytes32, id: &Bytes32, proof: &[u8]) -> bool {
    check_proof(root, id, proof) == Some(Lookup::Excluded)
}
