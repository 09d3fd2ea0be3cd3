//! Merkle tree verification and construction.
//!
//! Bitcoin duplicates the last node of any level with an odd node count
//! before pairing. The duplication makes two distinct transaction lists
//! hash to the same root (CVE-2012-2459); this module does not try to
//! detect that ambiguity. A proof whose sibling at some level equals the
//! running hash is accepted, whichever convention the prover used, so
//! callers comparing against a root taken from a header they already
//! validated are unaffected.
//!
//! All hashes are in natural (little-endian wire) byte order, including
//! the transaction ids fed in as leaves. Reverse display-order input
//! before building or checking a proof.

use crate::error::{RelayError, Result};
use crate::types::{Hash, MerkleProof};
use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};

/// Hash one tree level step: double SHA256 of `left || right`
fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut engine = sha256d::Hash::engine();
    engine.input(left);
    engine.input(right);
    sha256d::Hash::from_engine(engine).into_inner()
}

/// Recompute the root implied by `proof` and compare it to `claimed_root`.
///
/// Each bit of `proof.index`, least significant first, selects the
/// concatenation order at the matching level: a clear bit means the
/// running hash is a left child. A mismatching recomputed root returns
/// `Ok(false)` -- a false inclusion claim is a normal, if adversarial,
/// input. The only error is `MalformedProof`, raised when `index` does
/// not fit in the tree depth the sibling list asserts.
pub fn verify(proof: &MerkleProof, claimed_root: &Hash) -> Result<bool> {
    let depth = proof.siblings.len();
    if depth < 64 && proof.index >> depth != 0 {
        return Err(RelayError::MalformedProof {
            index: proof.index,
            depth,
        });
    }

    let mut current = proof.leaf;
    for (level, sibling) in proof.siblings.iter().enumerate() {
        // levels past the index width are left children
        let bit = proof.index.checked_shr(level as u32).unwrap_or(0) & 1;
        current = if bit == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
    }

    Ok(&current == claimed_root)
}

/// Compute the Merkle root of a full leaf list, duplicating the last
/// node of every odd-length level.
///
/// Fails with `MalformedProof` on an empty list; a block always has at
/// least a coinbase transaction.
pub fn merkle_root(leaves: &[Hash]) -> Result<Hash> {
    if leaves.is_empty() {
        return Err(RelayError::MalformedProof { index: 0, depth: 0 });
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(hash_pair(&pair[0], right));
        }
        level = next;
    }
    Ok(level[0])
}

/// Build the inclusion proof for `leaves[index]`, following the same
/// duplicate-last-node convention as [`merkle_root`].
pub fn merkle_path(leaves: &[Hash], index: u64) -> Result<MerkleProof> {
    if leaves.is_empty() || index >= leaves.len() as u64 {
        return Err(RelayError::MalformedProof {
            index,
            depth: leaves.len(),
        });
    }

    let mut siblings = Vec::new();
    let mut level = leaves.to_vec();
    let mut position = index as usize;

    while level.len() > 1 {
        let sibling_position = position ^ 1;
        // an odd tail pairs with itself
        let sibling = level.get(sibling_position).unwrap_or(&level[position]);
        siblings.push(*sibling);

        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(hash_pair(&pair[0], right));
        }
        level = next;
        position /= 2;
    }

    Ok(MerkleProof {
        leaf: leaves[index as usize],
        siblings,
        index,
    })
}
