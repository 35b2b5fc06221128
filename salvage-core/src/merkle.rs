//! Sector merkle roots.
//!
//! Leaves are 64-byte segments of the sector. Leaf hashes are
//! `BLAKE2b-256(0x00 || leaf)`, interior nodes are
//! `BLAKE2b-256(0x01 || left || right)`. Subtrees of equal height are joined
//! as soon as they appear; leftover subtrees are folded right-to-left.
use crate::types::{Hash256, LEAF_SIZE};
use rayon::prelude::*;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

// Below this many leaves hashing in parallel costs more than it saves.
const PAR_LEAVES: usize = 1024;

fn blake2b256() -> blake2b_simd::State {
    blake2b_simd::Params::new().hash_length(32).to_state()
}

fn finish(state: &blake2b_simd::State) -> Hash256 {
    let mut out = [0u8; 32];
    out.copy_from_slice(state.finalize().as_bytes());
    Hash256(out)
}

pub fn leaf_hash(leaf: &[u8]) -> Hash256 {
    let mut state = blake2b256();
    state.update(&[LEAF_PREFIX]);
    state.update(leaf);
    finish(&state)
}

pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut state = blake2b256();
    state.update(&[NODE_PREFIX]);
    state.update(left.as_bytes());
    state.update(right.as_bytes());
    finish(&state)
}

/// Incremental merkle root over a stream of leaf hashes.
#[derive(Default, Clone, Debug)]
pub struct Accumulator {
    stack: Vec<(u32, Hash256)>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_leaf(&mut self, leaf: &[u8]) {
        self.push_hash(leaf_hash(leaf));
    }

    /// Push an already-hashed leaf.
    pub fn push_hash(&mut self, hash: Hash256) {
        let mut node = (0u32, hash);
        while let Some(&(height, left)) = self.stack.last() {
            if height != node.0 {
                break;
            }
            self.stack.pop();
            node = (height + 1, node_hash(&left, &node.1));
        }
        self.stack.push(node);
    }

    /// Root of everything pushed so far; the zero hash when empty.
    pub fn root(&self) -> Hash256 {
        let mut iter = self.stack.iter().rev();
        let Some(&(_, mut acc)) = iter.next() else {
            return Hash256::default();
        };
        for (_, left) in iter {
            acc = node_hash(left, &acc);
        }
        acc
    }
}

/// Merkle root of a sector (or any byte run); a short final leaf is hashed as-is.
pub fn sector_root(data: &[u8]) -> Hash256 {
    let mut acc = Accumulator::new();
    if data.len() >= PAR_LEAVES * LEAF_SIZE {
        let leaves: Vec<Hash256> = data.par_chunks(LEAF_SIZE).map(leaf_hash).collect();
        for h in leaves {
            acc.push_hash(h);
        }
    } else {
        for leaf in data.chunks(LEAF_SIZE) {
            acc.push_leaf(leaf);
        }
    }
    acc.root()
}
