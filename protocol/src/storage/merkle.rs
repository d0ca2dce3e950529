//! # Merkle Tree
//!
//! Binary BLAKE3 tree over an ordered list of values. A block commits to its
//! transactions through the root; a light client checks one transaction
//! against that root with a [`MerkleProof`].
//!
//! ```text
//!              root
//!            /      \
//!        h(ab)      h(cc)        ← odd level: last node pairs with itself
//!        /   \      /   \
//!      h(a) h(b)  h(c)  (dup)
//! ```
//!
//! An empty tree has the all-zero root. A single-leaf tree's root is the
//! leaf hash.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{blake3_hash_multi, to_hex_prefixed};

/// Values that can sit in a tree leaf.
pub trait Hashable {
    fn leaf_hash(&self) -> [u8; 32];
}

/// Which side of the running hash a sibling sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    #[serde(with = "hex::serde")]
    pub hash: [u8; 32],
    pub side: Side,
}

/// Sibling path from one leaf up to the root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub index: usize,
    pub steps: Vec<ProofStep>,
}

/// Hash of an interior node.
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    blake3_hash_multi(&[left.as_slice(), right.as_slice()])
}

/// Checks that `leaf` is committed to by `root` along `proof`.
pub fn verify_proof(leaf: [u8; 32], proof: &MerkleProof, root: [u8; 32]) -> bool {
    let computed = proof.steps.iter().fold(leaf, |acc, step| match step.side {
        Side::Left => hash_pair(&step.hash, &acc),
        Side::Right => hash_pair(&acc, &step.hash),
    });
    computed == root
}

// ---------------------------------------------------------------------------
// MerkleTree
// ---------------------------------------------------------------------------

/// A fully materialized tree: every level is kept so proofs are cheap.
#[derive(Clone, Debug)]
pub struct MerkleTree<T> {
    values: Vec<T>,
    /// `levels[0]` are leaf hashes; the last level holds the root.
    levels: Vec<Vec<[u8; 32]>>,
}

impl<T: Hashable> MerkleTree<T> {
    pub fn new(values: Vec<T>) -> Self {
        let leaves: Vec<[u8; 32]> = values.iter().map(Hashable::leaf_hash).collect();
        let mut levels = vec![leaves];

        while levels.last().map_or(0, Vec::len) > 1 {
            let current = &levels[levels.len() - 1];
            let next = current
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(next);
        }

        Self { values, levels }
    }

    pub fn root(&self) -> [u8; 32] {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or([0u8; 32])
    }

    pub fn root_hex(&self) -> String {
        to_hex_prefixed(&self.root())
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Inclusion proof for the value at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.values.len() {
            return None;
        }

        let mut steps = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling, side) = if position % 2 == 0 {
                // Right sibling, or ourselves when we are the odd one out.
                let sibling = level.get(position + 1).unwrap_or(&level[position]);
                (sibling, Side::Right)
            } else {
                (&level[position - 1], Side::Left)
            };
            steps.push(ProofStep {
                hash: *sibling,
                side,
            });
            position /= 2;
        }

        Some(MerkleProof { index, steps })
    }

    /// Whether `value` is in the tree and its proof checks out.
    pub fn verify(&self, value: &T) -> bool {
        let leaf = value.leaf_hash();
        self.levels
            .first()
            .and_then(|leaves| leaves.iter().position(|h| *h == leaf))
            .and_then(|index| self.proof(index))
            .map_or(false, |proof| verify_proof(leaf, &proof, self.root()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::blake3_hash;

    #[derive(Clone, Debug, PartialEq)]
    struct Leaf(&'static str);

    impl Hashable for Leaf {
        fn leaf_hash(&self) -> [u8; 32] {
            blake3_hash(self.0.as_bytes())
        }
    }

    fn tree(items: &[&'static str]) -> MerkleTree<Leaf> {
        MerkleTree::new(items.iter().copied().map(Leaf).collect())
    }

    #[test]
    fn empty_tree_has_zero_root() {
        let t = tree(&[]);
        assert_eq!(t.root(), [0u8; 32]);
        assert!(t.proof(0).is_none());
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let t = tree(&["a"]);
        assert_eq!(t.root(), Leaf("a").leaf_hash());
        assert!(t.proof(0).unwrap().steps.is_empty());
    }

    #[test]
    fn odd_level_duplicates_last_node() {
        let t = tree(&["a", "b", "c"]);
        let ab = hash_pair(&Leaf("a").leaf_hash(), &Leaf("b").leaf_hash());
        let cc = hash_pair(&Leaf("c").leaf_hash(), &Leaf("c").leaf_hash());
        assert_eq!(t.root(), hash_pair(&ab, &cc));
    }

    #[test]
    fn every_leaf_has_a_valid_proof() {
        let items = ["a", "b", "c", "d", "e"];
        let t = tree(&items);
        for (i, item) in items.iter().enumerate() {
            let proof = t.proof(i).unwrap();
            assert!(verify_proof(Leaf(*item).leaf_hash(), &proof, t.root()), "leaf {i}");
        }
    }

    #[test]
    fn proof_fails_for_wrong_leaf_or_root() {
        let t = tree(&["a", "b", "c", "d"]);
        let proof = t.proof(1).unwrap();
        assert!(!verify_proof(Leaf("x").leaf_hash(), &proof, t.root()));
        assert!(!verify_proof(Leaf("b").leaf_hash(), &proof, [9u8; 32]));
    }

    #[test]
    fn verify_checks_membership() {
        let t = tree(&["a", "b", "c"]);
        assert!(t.verify(&Leaf("c")));
        assert!(!t.verify(&Leaf("z")));
    }

    #[test]
    fn order_matters() {
        assert_ne!(tree(&["a", "b"]).root(), tree(&["b", "a"]).root());
    }
}
