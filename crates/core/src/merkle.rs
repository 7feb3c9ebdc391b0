//! Merkle tree over transaction canonical strings.
//!
//! Leaves are SHA-256 hex digests of the input strings. A parent is the
//! digest of its children's hex strings concatenated left then right. When a
//! level has an odd number of nodes the last one is paired with itself.

use crate::hash::{sha256_concat, sha256_hex};

/// A merkle tree for inclusion proofs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// All nodes in the tree, level by level (leaf digests first).
    /// Empty when the tree was built from no leaves.
    levels: Vec<Vec<String>>,
}

fn combine(left: &str, right: &str) -> String {
    hex::encode(sha256_concat(&[left.as_bytes(), right.as_bytes()]))
}

impl MerkleTree {
    /// Build a merkle tree from an ordered list of leaf strings.
    pub fn new<S: AsRef<str>>(leaves: &[S]) -> Self {
        if leaves.is_empty() {
            return Self { levels: Vec::new() };
        }

        let mut levels = vec![leaves
            .iter()
            .map(|leaf| sha256_hex(leaf.as_ref().as_bytes()))
            .collect::<Vec<_>>()];

        loop {
            let current = &levels[levels.len() - 1];
            if current.len() <= 1 {
                break;
            }
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => combine(left, right),
                    [single] => combine(single, single),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    /// The root digest, or the empty string for a tree without leaves.
    pub fn root(&self) -> &str {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Whether the tree has a root at all.
    pub fn has_root(&self) -> bool {
        !self.levels.is_empty()
    }

    /// Get the number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Sibling digests from the leaf at `index` up to (not including) the root.
    pub fn proof(&self, index: usize) -> Option<Vec<String>> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut proof = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut idx = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            let sibling = level.get(sibling_idx).unwrap_or(&level[idx]);
            proof.push(sibling.clone());
            idx /= 2;
        }

        Some(proof)
    }

    /// Verify a proof for `leaf` at `index` against this tree's root.
    pub fn verify_proof(&self, leaf: &str, index: usize, proof: &[String]) -> bool {
        self.has_root() && verify_proof(self.root(), leaf, index, proof)
    }
}

/// Verify a merkle proof against a given root.
///
/// An empty root never verifies: it stands for "no tree".
pub fn verify_proof(root: &str, leaf: &str, index: usize, proof: &[String]) -> bool {
    if root.is_empty() {
        return false;
    }

    let mut current = sha256_hex(leaf.as_bytes());
    let mut idx = index;

    for sibling in proof {
        current = if idx % 2 == 0 {
            combine(&current, sibling)
        } else {
            combine(sibling, &current)
        };
        idx /= 2;
    }

    current == root
}

/// Compute just the root of a list of leaves.
pub fn merkle_root<S: AsRef<str>>(leaves: &[S]) -> String {
    MerkleTree::new(leaves).root().to_string()
}
