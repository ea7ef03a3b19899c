//! # Tree Arena
//!
//! Nodes live in a flat `Vec` and refer to each other by index. The same
//! arena holds a fully built set and a tree decoded from a proof.

use super::node::{get_bit, hash_single, Node, MAX_DEPTH};
use shared_types::Bytes32;

/// Outcome of walking an identifier's bit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The path ends at a Terminal equal to the identifier.
    Included,
    /// The path ends at Empty or at a different Terminal.
    Excluded,
    /// The path runs into a truncated subtree.
    Unknown,
}

/// An arena-backed Merkle Set tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: usize,
}

impl Tree {
    /// A tree with only an Empty root.
    pub fn empty() -> Self {
        Self {
            nodes: vec![Node::Empty],
            root: 0,
        }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            root: 0,
        }
    }

    pub(crate) fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Node at an arena index.
    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// The root node.
    pub fn root_node(&self) -> &Node {
        self.node(self.root)
    }

    /// Number of arena slots in use.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The 32-byte commitment for this tree.
    pub fn root_hash(&self) -> Bytes32 {
        match self.root_node() {
            Node::Empty => Bytes32::ZERO,
            Node::Terminal(id) => hash_single(id),
            node => node.hash(),
        }
    }

    /// Walk `id`'s bit path from the root.
    pub fn lookup(&self, id: &Bytes32) -> Lookup {
        let mut index = self.root;
        let mut depth = 0;
        loop {
            match *self.node(index) {
                Node::Empty => return Lookup::Excluded,
                Node::Terminal(found) if found == *id => return Lookup::Included,
                Node::Terminal(_) => return Lookup::Excluded,
                Node::Truncated(_) => return Lookup::Unknown,
                Node::Middle { left, right, .. } => {
                    if depth >= MAX_DEPTH {
                        return Lookup::Unknown;
                    }
                    index = if get_bit(id, depth) { right } else { left };
                    depth += 1;
                }
            }
        }
    }
}
