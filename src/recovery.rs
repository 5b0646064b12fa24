//! Recovery
//!
//! Rebuilds the in-memory index by replaying segment files on open.
//!
//! ## Steps
//! 1. List the data directory
//! 2. Remove `*.tmp` leftovers of an interrupted compaction
//! 3. Remove files superseded by the newest `compact_{M}` file: every
//!    segment with id < M, and `segment_{M}` itself. Compaction deletes these
//!    right after installing `compact_{M}`, so finding one means it crashed in
//!    between; keeping them could bring back keys whose tombstones were dropped.
//! 4. Replay the remaining segments oldest → newest, applying every record to
//!    the index the way put/delete would
//! 5. Reopen the newest write-path segment for appends if it is below the
//!    size limit, otherwise start a fresh one

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::index::Index;
use crate::storage::{list_dir, DirListing, Segment, SegmentFile, SegmentIterator, SegmentKind, SegmentSet};

/// Handles index reconstruction on engine open
pub struct Recovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Segment files replayed
    pub segments_scanned: u64,

    /// Complete records replayed across all segments
    pub records_replayed: u64,

    /// Live keys in the rebuilt index
    pub keys_recovered: u64,

    /// Bytes of torn trailing records discarded
    pub bytes_truncated: u64,

    /// Temp files and superseded segments found (removed unless verifying)
    pub stale_files: u64,
}

impl RecoveryResult {
    /// Whether a torn write was cut from the end of a segment
    pub fn was_truncated(&self) -> bool {
        self.bytes_truncated > 0
    }
}

/// State handed to the engine after recovery
pub(crate) struct RecoveredState {
    pub(crate) segments: SegmentSet,
    pub(crate) index: Index,
    pub(crate) next_segment_id: u64,
}

impl Recovery {
    /// Recover the data directory named by `config`
    ///
    /// Mutates the directory: removes stale files, truncates torn tails and
    /// may create a new active segment.
    pub(crate) fn recover(config: &Config) -> Result<(RecoveredState, RecoveryResult)> {
        let dir = config.data_dir.as_path();
        let listing = list_dir(dir)?;
        let mut result = RecoveryResult::default();

        for temp in &listing.temp_files {
            tracing::warn!(path = %temp.display(), "removing interrupted compaction output");
            fs::remove_file(temp)?;
            result.stale_files += 1;
        }

        let superseded = Self::superseded(&listing);
        for file in &superseded {
            let path = file.path_in(dir);
            tracing::warn!(path = %path.display(), "removing segment superseded by compaction");
            fs::remove_file(&path)?;
            result.stale_files += 1;
        }

        let mut index = Index::new();
        let mut opened: Vec<Arc<Segment>> = Vec::new();

        for file in listing.segments.iter().filter(|f| !superseded.contains(f)) {
            let (segment, summary) = Segment::open_with(dir, *file, |entry| {
                index.apply(&entry.key, file.id, entry.offset, entry.tombstone)
            })?;

            tracing::debug!(
                segment = file.id,
                kind = ?file.kind,
                records = summary.records,
                size = segment.size(),
                "replayed segment"
            );

            result.segments_scanned += 1;
            result.records_replayed += summary.records;
            result.bytes_truncated += summary.truncated_bytes;
            opened.push(Arc::new(segment));
        }

        let active = match opened.pop() {
            Some(last)
                if last.kind() == SegmentKind::Log
                    && last.size() < config.segment_size_limit =>
            {
                last.reopen_for_append(config.sync_strategy)?;
                last
            }
            other => {
                let id = other.as_ref().map_or(1, |s| s.id() + 1);
                opened.extend(other);
                tracing::debug!(segment = id, "creating active segment");
                Arc::new(Segment::create(dir, SegmentFile::log(id), config.sync_strategy)?)
            }
        };

        let next_segment_id = active.id() + 1;
        result.keys_recovered = index.len() as u64;

        let segments = SegmentSet::new(opened, active)?;
        Ok((
            RecoveredState {
                segments,
                index,
                next_segment_id,
            },
            result,
        ))
    }

    /// Check a data directory without modifying it
    ///
    /// Replays every segment that recovery would keep and reports what it
    /// found. Mid-file corruption fails with `CorruptRecord`.
    pub fn verify(dir: &Path) -> Result<RecoveryResult> {
        let listing = list_dir(dir)?;
        let superseded = Self::superseded(&listing);
        let mut result = RecoveryResult {
            stale_files: (listing.temp_files.len() + superseded.len()) as u64,
            ..RecoveryResult::default()
        };

        let mut index = Index::new();
        for file in listing.segments.iter().filter(|f| !superseded.contains(f)) {
            let mut iter = SegmentIterator::open(&file.path_in(dir), None)?;
            for entry in &mut iter {
                let entry = entry?;
                index.apply(&entry.key, file.id, entry.offset, entry.tombstone);
                result.records_replayed += 1;
            }
            result.segments_scanned += 1;
            result.bytes_truncated += iter.truncated_bytes();
        }

        result.keys_recovered = index.len() as u64;
        Ok(result)
    }

    /// Files made redundant by the newest compacted segment
    fn superseded(listing: &DirListing) -> Vec<SegmentFile> {
        let Some(newest) = listing.newest_compacted() else {
            return Vec::new();
        };

        listing
            .segments
            .iter()
            .filter(|f| f.id < newest || (f.id == newest && f.kind == SegmentKind::Log))
            .copied()
            .collect()
    }
}
