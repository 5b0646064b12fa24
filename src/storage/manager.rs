//! Segment Set
//!
//! The ordered list of segments owned by the engine.
//!
//! ## Responsibilities
//! - Keep segments ordered oldest → newest by id
//! - Track which segment is active
//! - Install a new active segment on rotation
//! - Swap a merged set of closed segments for their compacted replacement

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{EmberError, Result};

use super::Segment;

/// Segments ordered by id; the active segment is always the newest
///
/// Plain data: the engine guards it (together with the index) behind one
/// `RwLock`, so a reader sees the set and the index change in one step.
#[derive(Debug)]
pub struct SegmentSet {
    segments: BTreeMap<u64, Arc<Segment>>,
    active_id: u64,
}

impl SegmentSet {
    /// Build a set from closed segments plus the active one
    pub fn new(closed: Vec<Arc<Segment>>, active: Arc<Segment>) -> Result<Self> {
        let active_id = active.id();
        let mut segments = BTreeMap::new();

        for segment in closed {
            if segment.id() >= active_id {
                return Err(EmberError::Storage(format!(
                    "closed segment {} is not older than active segment {}",
                    segment.id(),
                    active_id
                )));
            }
            segments.insert(segment.id(), segment);
        }
        segments.insert(active_id, active);

        Ok(Self {
            segments,
            active_id,
        })
    }

    /// The segment accepting appends
    pub fn active(&self) -> &Arc<Segment> {
        // Invariant: active_id is always present
        &self.segments[&self.active_id]
    }

    pub fn active_id(&self) -> u64 {
        self.active_id
    }

    pub fn get(&self, id: u64) -> Option<&Arc<Segment>> {
        self.segments.get(&id)
    }

    /// Closed segments, oldest first
    pub fn closed(&self) -> Vec<Arc<Segment>> {
        self.segments
            .range(..self.active_id)
            .map(|(_, s)| Arc::clone(s))
            .collect()
    }

    pub fn closed_count(&self) -> usize {
        self.segments.len() - 1
    }

    /// Total number of segments, active included
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false: there is always an active segment
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment ids, oldest first
    pub fn ids(&self) -> Vec<u64> {
        self.segments.keys().copied().collect()
    }

    /// Bytes across all segments
    pub fn total_size(&self) -> u64 {
        self.segments.values().map(|s| s.size()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.segments.values()
    }

    /// Make `segment` the active one; returns the previous active segment
    pub fn install_active(&mut self, segment: Arc<Segment>) -> Result<Arc<Segment>> {
        if segment.id() <= self.active_id {
            return Err(EmberError::Storage(format!(
                "new active segment {} must be newer than {}",
                segment.id(),
                self.active_id
            )));
        }

        let previous = Arc::clone(self.active());
        self.active_id = segment.id();
        self.segments.insert(segment.id(), segment);
        Ok(previous)
    }

    /// Replace the closed segments `merged_ids` with `merged`
    ///
    /// `merged` must carry the highest of `merged_ids`. Returns the removed
    /// segments so the caller can delete their files once nobody can reach them.
    pub fn replace(&mut self, merged_ids: &[u64], merged: Arc<Segment>) -> Result<Vec<Arc<Segment>>> {
        let newest = merged_ids.iter().copied().max().ok_or_else(|| {
            EmberError::Compaction("nothing to replace".to_string())
        })?;
        if merged.id() != newest {
            return Err(EmberError::Compaction(format!(
                "merged segment {} does not match newest input {}",
                merged.id(),
                newest
            )));
        }
        for id in merged_ids {
            if *id == self.active_id {
                return Err(EmberError::Compaction(format!(
                    "active segment {} cannot be compacted",
                    id
                )));
            }
            if !self.segments.contains_key(id) {
                return Err(EmberError::Compaction(format!(
                    "segment {} is no longer part of the set",
                    id
                )));
            }
        }

        let removed = merged_ids
            .iter()
            .filter_map(|id| self.segments.remove(id))
            .collect();
        self.segments.insert(merged.id(), merged);

        Ok(removed)
    }
}
