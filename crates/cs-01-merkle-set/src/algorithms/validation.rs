//! # Proof Validation
//!
//! Accept or reject additions and removals supplied by a full node against
//! the roots committed in a trusted header block.
//!
//! A mismatch is a normal answer (`false`) that the caller uses to distrust
//! or disconnect the peer.

use crate::algorithms::merkle_set::compute_merkle_set_root;
use crate::algorithms::proof::{confirm_excluded, confirm_included};
use shared_types::{std_hash, AdditionProof, Bytes32, PuzzleHashCoins, RemovalEntry, RemovalProof};

/// Commitment to the coins created under one puzzle hash.
///
/// A single id hashes on its own; otherwise the ids are sorted in descending
/// order and hashed as one concatenation, so enumeration order never matters.
pub fn hash_coin_ids(ids: &[Bytes32]) -> Bytes32 {
    if let [single] = ids {
        return std_hash(single);
    }
    let mut sorted = ids.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let mut buf = Vec::with_capacity(sorted.len() * 32);
    for id in &sorted {
        buf.extend_from_slice(id.as_bytes());
    }
    std_hash(&buf)
}

/// Leaves of the additions set for these groups: each puzzle hash and the
/// hash of its coin ids.
pub fn additions_leaves(groups: &[PuzzleHashCoins]) -> Vec<Bytes32> {
    let mut leaves = Vec::with_capacity(groups.len() * 2);
    for group in groups {
        let ids: Vec<Bytes32> = group.coins.iter().map(|c| c.coin_id()).collect();
        leaves.push(group.puzzle_hash);
        leaves.push(hash_coin_ids(&ids));
    }
    leaves
}

/// Validate coins added in a block against its additions root.
///
/// With `proofs = None` the groups must be the block's complete additions and
/// the root is recomputed from them. Otherwise every group needs its own
/// proofs: an exclusion proof for an empty group, and for a non-empty group
/// both the coin-list inclusion proof and the puzzle-hash inclusion proof.
pub fn validate_additions(
    coins: &[PuzzleHashCoins],
    proofs: Option<&[AdditionProof]>,
    root: &Bytes32,
) -> bool {
    let Some(proofs) = proofs else {
        return compute_merkle_set_root(&additions_leaves(coins)) == *root;
    };

    if coins.len() != proofs.len() {
        tracing::debug!(
            "[cs-01] additions/proofs length mismatch: {} != {}",
            coins.len(),
            proofs.len()
        );
        return false;
    }

    coins.iter().zip(proofs).all(|(group, proof)| {
        if group.puzzle_hash != proof.puzzle_hash {
            return false;
        }
        if group.coins.is_empty() {
            return confirm_excluded(root, &group.puzzle_hash, &proof.puzzle_hash_proof);
        }

        let ids: Vec<Bytes32> = group.coins.iter().map(|c| c.coin_id()).collect();
        let Some(coin_list_proof) = proof.coin_list_proof.as_deref() else {
            return false;
        };
        confirm_included(root, &hash_coin_ids(&ids), coin_list_proof)
            && confirm_included(root, &group.puzzle_hash, &proof.puzzle_hash_proof)
    })
}

/// Validate removal claims for a block against its removals root.
///
/// With `proofs = None` the entries must be the block's complete removals;
/// entries without a coin are ignored and the root is recomputed from the
/// rest. Otherwise each entry is checked alone: an inclusion proof when the
/// coin is present, an exclusion proof when it is not.
pub fn validate_removals(
    coins: &[RemovalEntry],
    proofs: Option<&[RemovalProof]>,
    root: &Bytes32,
) -> bool {
    let Some(proofs) = proofs else {
        let removed: Vec<Bytes32> = coins
            .iter()
            .filter(|entry| entry.coin.is_some())
            .map(|entry| entry.coin_id)
            .collect();
        return compute_merkle_set_root(&removed) == *root;
    };

    if coins.len() != proofs.len() {
        tracing::debug!(
            "[cs-01] removals/proofs length mismatch: {} != {}",
            coins.len(),
            proofs.len()
        );
        return false;
    }

    coins.iter().zip(proofs).all(|(entry, proof)| {
        if entry.coin_id != proof.coin_id {
            return false;
        }
        match &entry.coin {
            None => confirm_excluded(root, &entry.coin_id, &proof.proof),
            Some(coin) => {
                coin.coin_id() == entry.coin_id
                    && confirm_included(root, &entry.coin_id, &proof.proof)
            }
        }
    })
}
