//! Index Module
//!
//! Global key → (segment id, offset) map.
//!
//! ## Invariants
//! - At most one entry per key, pointing at that key's newest live record
//! - Deleted keys have no entry; absence is authoritative
//!
//! The index carries no lock of its own; the engine keeps it next to the
//! segment set under one `RwLock` so both change together.

use std::collections::HashMap;

/// Location of a key's newest live record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    pub segment_id: u64,
    pub offset: u64,
}

impl IndexEntry {
    pub fn new(segment_id: u64, offset: u64) -> Self {
        Self { segment_id, offset }
    }
}

/// Hash index over every live key
#[derive(Debug, Default)]
pub struct Index {
    entries: HashMap<Vec<u8>, IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<IndexEntry> {
        self.entries.get(key).copied()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Point `key` at a new record, returning the previous location
    pub fn insert(&mut self, key: Vec<u8>, entry: IndexEntry) -> Option<IndexEntry> {
        self.entries.insert(key, entry)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<IndexEntry> {
        self.entries.remove(key)
    }

    /// Apply one replayed record exactly as put/delete would
    pub fn apply(&mut self, key: &[u8], segment_id: u64, offset: u64, tombstone: bool) {
        if tombstone {
            self.entries.remove(key);
        } else {
            self.entries
                .insert(key.to_vec(), IndexEntry::new(segment_id, offset));
        }
    }

    /// Move `key` from `from` to `to`, only if it still points at `from`
    ///
    /// Keys rewritten or deleted after compaction took its snapshot no
    /// longer match and are left alone.
    pub fn remap(&mut self, key: &[u8], from: IndexEntry, to: IndexEntry) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if *entry == from => {
                *entry = to;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
