use crate::types::Hash256;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Verified sectors seen during a run, keyed by merkle root. Append-only.
#[derive(Default)]
pub struct SectorCache {
    sectors: Mutex<HashMap<Hash256, Bytes>>,
}

impl SectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, root: &Hash256) -> Option<Bytes> {
        self.sectors.lock().unwrap_or_else(PoisonError::into_inner).get(root).cloned()
    }

    /// Keep the first copy stored for a root.
    pub fn insert(&self, root: Hash256, sector: Bytes) {
        self.sectors.lock().unwrap_or_else(PoisonError::into_inner).entry(root).or_insert(sector);
    }

    pub fn contains(&self, root: &Hash256) -> bool {
        self.sectors.lock().unwrap_or_else(PoisonError::into_inner).contains_key(root)
    }

    pub fn len(&self) -> usize {
        self.sectors.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
