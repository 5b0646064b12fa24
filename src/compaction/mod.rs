//! Compaction Module
//!
//! Merges every closed segment into one, keeping only the newest live value
//! per key.
//!
//! ## Cycle
//! 1. Snapshot the closed segments (the active segment is never touched)
//! 2. Skip when fewer than two are closed
//! 3. Replay them oldest → newest; later records override earlier ones
//! 4. Write the surviving values into `compact_{newest id}.log`
//! 5. Under the write lock and the state write lock: swap the merged
//!    segments for the new one and remap index entries that still point at a
//!    merged record; then, with no lock held, delete the old files
//!
//! Steps 3 and 4 run without any engine lock, so writers only stall for the
//! swap itself. Because readers hold the state read lock for the whole of a
//! `get`, a file is never deleted while a read of it is in flight, and the
//! index never points at a segment that has left the set.

mod worker;

pub use worker::CompactionWorker;

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use crate::engine::EngineShared;
use crate::error::{EmberError, Result};
use crate::index::IndexEntry;
use crate::record::RecordValue;
use crate::storage::{Segment, SegmentBuilder, SegmentFile, SegmentKind};

/// What one compaction cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Closed segments merged (0 when the cycle was skipped)
    pub segments_merged: usize,

    /// Live keys written to the merged segment
    pub keys_retained: usize,

    /// Keys whose newest record was a tombstone, dropped entirely
    pub tombstones_dropped: usize,

    /// Records replayed but not carried over
    pub records_discarded: u64,

    /// Size of the merged inputs
    pub bytes_before: u64,

    /// Size of the merged segment
    pub bytes_after: u64,

    /// Id of the new segment, `None` when skipped
    pub merged_segment_id: Option<u64>,
}

impl CompactionStats {
    pub fn is_skipped(&self) -> bool {
        self.merged_segment_id.is_none()
    }
}

/// Newest record for a key among the inputs: (input position, offset), or
/// `None` for a tombstone
type Latest = HashMap<Vec<u8>, Option<(usize, u64)>>;

/// One merge pass over an engine's closed segments
pub(crate) struct Compactor<'a> {
    shared: &'a EngineShared,
}

impl<'a> Compactor<'a> {
    pub(crate) fn new(shared: &'a EngineShared) -> Self {
        Self { shared }
    }

    /// Run one cycle
    pub(crate) fn run(&self) -> Result<CompactionStats> {
        // Only one cycle at a time, whether manual or from the worker
        let _cycle = self.shared.compaction_lock.lock();
        let started = Instant::now();

        // Step 1: snapshot
        let inputs = self.shared.state.read().segments.closed();

        // Step 2
        if inputs.len() < 2 {
            tracing::trace!(closed = inputs.len(), "compaction skipped");
            return Ok(CompactionStats::default());
        }

        let newest = &inputs[inputs.len() - 1];
        if newest.kind() == SegmentKind::Compacted {
            return Err(EmberError::Compaction(format!(
                "newest closed segment {} is already compacted",
                newest.id()
            )));
        }
        self.remove_orphan(newest.id())?;

        // Step 3: replay oldest → newest
        let (latest, records_seen) = Self::collect_latest(&inputs)?;

        // Step 4: write the merged segment
        let merged_id = newest.id();
        let mut builder = SegmentBuilder::new(&self.shared.config.data_dir, merged_id)?;
        let mut moves = Vec::with_capacity(latest.len());
        let mut tombstones_dropped = 0;

        let written = Self::write_live(&inputs, latest, &mut builder, &mut moves, &mut tombstones_dropped);
        if let Err(e) = written {
            builder.discard();
            return Err(e);
        }
        let merged = Arc::new(builder.finish()?);

        // Step 5: swap, remap, then delete
        let merged_ids: Vec<u64> = inputs.iter().map(|s| s.id()).collect();
        let removed = {
            let _write_guard = self.shared.write_lock.lock();
            let mut state = self.shared.state.write();

            let removed = match state.segments.replace(&merged_ids, Arc::clone(&merged)) {
                Ok(removed) => removed,
                Err(e) => {
                    drop(state);
                    if let Err(rm) = fs::remove_file(merged.path()) {
                        tracing::warn!(error = %rm, "failed to remove unused compacted segment");
                    }
                    return Err(e);
                }
            };

            for (key, from, to_offset) in &moves {
                state
                    .index
                    .remap(key, *from, IndexEntry::new(merged_id, *to_offset));
            }
            removed
        };

        for segment in &removed {
            if let Err(e) = fs::remove_file(segment.path()) {
                tracing::warn!(
                    path = %segment.path().display(),
                    error = %e,
                    "failed to delete compacted input"
                );
            }
        }

        let stats = CompactionStats {
            segments_merged: inputs.len(),
            keys_retained: moves.len(),
            tombstones_dropped,
            records_discarded: records_seen - moves.len() as u64,
            bytes_before: inputs.iter().map(|s| s.size()).sum(),
            bytes_after: merged.size(),
            merged_segment_id: Some(merged_id),
        };

        tracing::info!(
            segments = stats.segments_merged,
            merged_segment = merged_id,
            keys = stats.keys_retained,
            tombstones_dropped = stats.tombstones_dropped,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compaction finished"
        );

        Ok(stats)
    }

    /// Remove a `compact_{id}` file the set does not own
    ///
    /// Left behind when a swap failed and the cleanup after it failed too;
    /// without this every later cycle would trip over it until the next
    /// rotation.
    fn remove_orphan(&self, id: u64) -> Result<()> {
        let path = SegmentFile::compacted(id).path_in(&self.shared.config.data_dir);
        if path.is_file() {
            tracing::warn!(path = %path.display(), "removing orphaned compacted segment");
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn collect_latest(inputs: &[Arc<Segment>]) -> Result<(Latest, u64)> {
        let mut latest = Latest::new();
        let mut records_seen = 0u64;

        for (position, segment) in inputs.iter().enumerate() {
            for entry in segment.replay()? {
                let entry = entry?;
                let location = if entry.tombstone {
                    None
                } else {
                    Some((position, entry.offset))
                };
                latest.insert(entry.key, location);
                records_seen += 1;
            }
        }

        Ok((latest, records_seen))
    }

    fn write_live(
        inputs: &[Arc<Segment>],
        latest: Latest,
        builder: &mut SegmentBuilder,
        moves: &mut Vec<(Vec<u8>, IndexEntry, u64)>,
        tombstones_dropped: &mut usize,
    ) -> Result<()> {
        for (key, location) in latest {
            let Some((position, offset)) = location else {
                *tombstones_dropped += 1;
                continue;
            };

            let source = &inputs[position];
            let value = match source.read_at(offset)? {
                RecordValue::Value(v) => v,
                RecordValue::Tombstone => {
                    return Err(EmberError::Compaction(format!(
                        "expected a value at offset {} of segment {}",
                        offset,
                        source.id()
                    )))
                }
            };

            let new_offset = builder.add(&key, &value)?;
            moves.push((key, IndexEntry::new(source.id(), offset), new_offset));
        }
        Ok(())
    }
}
