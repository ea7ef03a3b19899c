//! # Merkle Set Construction
//!
//! Builds the binary radix tree over a set of identifiers and produces
//! membership proofs.
//!
//! # Algorithm
//!
//! 1. Sort and deduplicate the identifiers.
//! 2. A range of sorted ids sharing a prefix of `depth` bits is split at the
//!    first id whose bit `depth` is 1 (`partition_point`).
//! 3. An empty range is Empty, a single id is Terminal, anything larger is a
//!    Middle over the two halves.
//!
//! Construction runs on an explicit work stack, so 256-level paths never
//! touch the call stack.
//!
//! # Time Complexity: O(n log n)
//! # Space Complexity: O(n)

use crate::algorithms::proof::write_sibling;
use crate::domain::{get_bit, hash_middle, Lookup, MerkleSetError, Node, NodeType, Tree};
use shared_types::Bytes32;

enum Task {
    Visit { lo: usize, hi: usize, depth: usize },
    Combine,
}

/// An immutable Merkle Set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleSet {
    tree: Tree,
    len: usize,
}

impl MerkleSet {
    /// Build a set. Order and duplicates do not affect the root.
    pub fn new(ids: &[Bytes32]) -> Self {
        let mut leaves = ids.to_vec();
        leaves.sort_unstable();
        leaves.dedup();
        let len = leaves.len();
        Self {
            tree: build_tree(&leaves),
            len,
        }
    }

    /// Build a set from raw byte strings, rejecting any that are not
    /// exactly 32 bytes before hashing anything.
    pub fn from_raw<T: AsRef<[u8]>>(items: &[T]) -> Result<Self, MerkleSetError> {
        let ids = items
            .iter()
            .map(|item| Bytes32::from_slice(item.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(&ids))
    }

    /// The 32-byte commitment.
    pub fn root(&self) -> Bytes32 {
        self.tree.root_hash()
    }

    /// Number of distinct elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The underlying tree.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Membership of `id` plus a proof that confirms the answer against
    /// [`root`](Self::root).
    ///
    /// The proof is the pre-order serialization of the tree pruned to `id`'s
    /// path: every sibling off the path is written as Empty, Terminal or a
    /// Truncated hash.
    pub fn is_included(&self, id: &Bytes32) -> (bool, Vec<u8>) {
        let mut proof = Vec::new();
        // Right siblings of left turns, written after the subtree they follow.
        let mut deferred = Vec::new();
        let mut index = self.tree.root;
        let mut depth = 0;

        let included = loop {
            match *self.tree.node(index) {
                Node::Middle { left, right, .. } => {
                    proof.push(NodeType::Middle as u8);
                    if get_bit(id, depth) {
                        write_sibling(&mut proof, self.tree.node(left));
                        index = right;
                    } else {
                        deferred.push(right);
                        index = left;
                    }
                    depth += 1;
                }
                node => {
                    write_sibling(&mut proof, &node);
                    break node == Node::Terminal(*id);
                }
            }
        };

        while let Some(sibling) = deferred.pop() {
            write_sibling(&mut proof, self.tree.node(sibling));
        }

        (included, proof)
    }

    /// Membership without a proof.
    pub fn contains(&self, id: &Bytes32) -> bool {
        self.tree.lookup(id) == Lookup::Included
    }
}

/// Root of the set of `leaves`.
pub fn compute_merkle_set_root(leaves: &[Bytes32]) -> Bytes32 {
    MerkleSet::new(leaves).root()
}

/// `leaves` must be sorted and free of duplicates.
fn build_tree(leaves: &[Bytes32]) -> Tree {
    if leaves.is_empty() {
        return Tree::empty();
    }

    let mut tree = Tree::with_capacity(leaves.len() * 2);
    let mut tasks = vec![Task::Visit {
        lo: 0,
        hi: leaves.len(),
        depth: 0,
    }];
    let mut built: Vec<usize> = Vec::new();

    while let Some(task) = tasks.pop() {
        match task {
            Task::Visit { lo, hi, depth } => match hi - lo {
                0 => built.push(tree.push(Node::Empty)),
                1 => built.push(tree.push(Node::Terminal(leaves[lo]))),
                _ => {
                    let mid = lo + leaves[lo..hi].partition_point(|id| !get_bit(id, depth));
                    tasks.push(Task::Combine);
                    tasks.push(Task::Visit {
                        lo: mid,
                        hi,
                        depth: depth + 1,
                    });
                    tasks.push(Task::Visit {
                        lo,
                        hi: mid,
                        depth: depth + 1,
                    });
                }
            },
            Task::Combine => {
                if let (Some(right), Some(left)) = (built.pop(), built.pop()) {
                    let hash = hash_middle(tree.node(left), tree.node(right));
                    built.push(tree.push(Node::Middle { left, right, hash }));
                }
            }
        }
    }

    tree.root = built.pop().unwrap_or(0);
    tree
}
