//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Run recovery on open
//! - Append put/delete records to the active segment and keep the index current
//! - Rotate the active segment once it reaches the size limit
//! - Serve point reads through the index
//! - Own the background compaction worker

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::command::Command;
use crate::compaction::{CompactionStats, CompactionWorker, Compactor};
use crate::config::Config;
use crate::error::{EmberError, Result};
use crate::index::{Index, IndexEntry};
use crate::record::{self, RecordValue};
use crate::recovery::{Recovery, RecoveryResult};
use crate::storage::{Segment, SegmentFile, SegmentSet};

/// Segment set and index, always changed together
pub(crate) struct EngineState {
    pub(crate) segments: SegmentSet,
    pub(crate) index: Index,
}

/// Engine internals shared with the compaction worker
pub(crate) struct EngineShared {
    /// Engine configuration
    pub(crate) config: Config,

    /// Serializes put/delete/rotation and the compaction swap
    pub(crate) write_lock: Mutex<()>,

    /// Segments + index (many concurrent readers, short exclusive updates)
    pub(crate) state: RwLock<EngineState>,

    /// Next id for a new active segment (only bumped under write_lock)
    pub(crate) next_segment_id: AtomicU64,

    /// Keeps manual and background compaction cycles from overlapping
    pub(crate) compaction_lock: Mutex<()>,
}

impl EngineShared {
    /// Active segment with room for another append, rotating if it is full
    ///
    /// Caller must hold `write_lock`. The record that reached the limit stays
    /// in the old segment; the new one is only created when the next write
    /// arrives.
    fn writable_segment(&self) -> Result<Arc<Segment>> {
        let active = Arc::clone(self.state.read().segments.active());
        if active.size() < self.config.segment_size_limit {
            return Ok(active);
        }
        self.rotate()
    }

    /// Seal the active segment and start a new one
    fn rotate(&self) -> Result<Arc<Segment>> {
        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let segment = Arc::new(Segment::create(
            &self.config.data_dir,
            SegmentFile::log(id),
            self.config.sync_strategy,
        )?);

        let previous = self
            .state
            .write()
            .segments
            .install_active(Arc::clone(&segment))?;
        previous.seal()?;

        tracing::debug!(
            sealed = previous.id(),
            sealed_size = previous.size(),
            active = id,
            "rotated active segment"
        );

        Ok(segment)
    }
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/rotation): Serialized by `write_lock`
///   - Only ONE write operation at a time
///   - Order: write_lock → append to active segment → state (write) → index
///
/// - **Reads** (get): Concurrent
///   - No write_lock needed
///   - Hold the state read lock for the lookup AND the file read, so the
///     compactor cannot swap out or delete the segment mid-read
///
/// - **Compaction**: replays and writes without locks, then takes
///   write_lock → state (write) only for the swap
pub struct Engine {
    shared: Arc<EngineShared>,

    /// Background compactor (None when disabled or after close)
    worker: Option<CompactionWorker>,

    /// What recovery found on open
    recovery: RecoveryResult,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config, create the data directory
    /// 2. Replay existing segments to rebuild the index
    /// 3. Establish the active segment
    /// 4. Start the compaction worker
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        fs::create_dir_all(&config.data_dir)?;
        if !config.data_dir.is_dir() {
            return Err(EmberError::Config(format!(
                "{} is not a directory",
                config.data_dir.display()
            )));
        }

        let (recovered, recovery) = Recovery::recover(&config)?;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            segments = recovery.segments_scanned,
            records = recovery.records_replayed,
            keys = recovery.keys_recovered,
            bytes_truncated = recovery.bytes_truncated,
            stale_files = recovery.stale_files,
            active_segment = recovered.segments.active_id(),
            "engine opened"
        );

        let compaction_interval = config.compaction_interval;
        let shared = Arc::new(EngineShared {
            config,
            write_lock: Mutex::new(()),
            state: RwLock::new(EngineState {
                segments: recovered.segments,
                index: recovered.index,
            }),
            next_segment_id: AtomicU64::new(recovered.next_segment_id),
            compaction_lock: Mutex::new(()),
        });

        let worker = match compaction_interval {
            Some(interval) => Some(CompactionWorker::spawn(Arc::clone(&shared), interval)?),
            None => None,
        };

        Ok(Self {
            shared,
            worker,
            recovery,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Execute a command
    ///
    /// Routes commands to the matching operation
    pub fn execute(&self, command: Command) -> Result<Option<Vec<u8>>> {
        tracing::trace!(
            key_len = command.key().len(),
            write = command.is_write(),
            "execute"
        );

        match command {
            Command::Get { key } => self.get(&key),
            Command::Put { key, value } => {
                self.put(&key, &value)?;
                Ok(None)
            }
            Command::Delete { key } => {
                self.delete(&key)?;
                Ok(None)
            }
        }
    }

    /// Get a value by key
    ///
    /// Returns `Ok(None)` when the key was never written or its newest
    /// record is a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.shared.state.read();

        let Some(entry) = state.index.get(key) else {
            return Ok(None);
        };

        let segment = state.segments.get(entry.segment_id).ok_or_else(|| {
            EmberError::Storage(format!(
                "index points at segment {} which is not open",
                entry.segment_id
            ))
        })?;

        match segment.read_at(entry.offset)? {
            RecordValue::Value(value) => Ok(Some(value)),
            RecordValue::Tombstone => Err(EmberError::CorruptRecord(format!(
                "index points at a tombstone (segment {}, offset {})",
                entry.segment_id, entry.offset
            ))),
        }
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Encode (oversized records are rejected before any write)
    /// 2. Acquire write lock
    /// 3. Append to the active segment (rotating first if it is full)
    /// 4. Point the index at the new record
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let record = record::encode(key, Some(value))?;

        let _write_guard = self.shared.write_lock.lock();

        let active = self.shared.writable_segment()?;
        let offset = active.append(&record)?;

        self.shared
            .state
            .write()
            .index
            .insert(key.to_vec(), IndexEntry::new(active.id(), offset));

        tracing::trace!(segment = active.id(), offset, len = record.len(), "put");
        Ok(())
    }

    /// Delete a key
    ///
    /// Appends a tombstone and drops the key from the index. Deleting a key
    /// that is not live is a no-op and writes nothing.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let record = record::encode(key, None)?;

        let _write_guard = self.shared.write_lock.lock();

        if !self.shared.state.read().index.contains_key(key) {
            return Ok(());
        }

        let active = self.shared.writable_segment()?;
        let offset = active.append(&record)?;

        self.shared.state.write().index.remove(key);

        tracing::trace!(segment = active.id(), offset, "delete");
        Ok(())
    }

    /// Run one compaction cycle now
    ///
    /// Same code path as the background worker. Returns skipped stats when
    /// fewer than two segments are closed.
    pub fn compact(&self) -> Result<CompactionStats> {
        Compactor::new(&self.shared).run()
    }

    /// fsync the active segment regardless of sync strategy
    pub fn sync(&self) -> Result<()> {
        let active = Arc::clone(self.shared.state.read().segments.active());
        active.sync()
    }

    /// Close the engine gracefully
    ///
    /// Stops the compaction worker first, then seals the active segment.
    pub fn close(mut self) -> Result<()> {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }

        let _write_guard = self.shared.write_lock.lock();
        let state = self.shared.state.read();
        state.segments.active().seal()?;

        tracing::info!(
            data_dir = %self.shared.config.data_dir.display(),
            segments = state.segments.len(),
            keys = state.index.len(),
            "engine closed"
        );

        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.shared.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// What recovery found when this engine was opened
    pub fn recovery_result(&self) -> &RecoveryResult {
        &self.recovery
    }

    /// Number of segments, active included
    pub fn segment_count(&self) -> usize {
        self.shared.state.read().segments.len()
    }

    /// Number of closed segments
    pub fn closed_segment_count(&self) -> usize {
        self.shared.state.read().segments.closed_count()
    }

    /// Segment ids, oldest first
    pub fn segment_ids(&self) -> Vec<u64> {
        self.shared.state.read().segments.ids()
    }

    pub fn active_segment_id(&self) -> u64 {
        self.shared.state.read().segments.active_id()
    }

    /// Bytes written to the active segment
    pub fn active_segment_size(&self) -> u64 {
        self.shared.state.read().segments.active().size()
    }

    /// Size of one segment, if it is open
    pub fn segment_size(&self, id: u64) -> Option<u64> {
        self.shared.state.read().segments.get(id).map(|s| s.size())
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.shared.state.read().index.len()
    }

    /// Bytes across all segments
    pub fn disk_usage(&self) -> u64 {
        self.shared.state.read().segments.total_size()
    }

    /// Whether the background compactor is running
    pub fn is_compacting_in_background(&self) -> bool {
        self.worker.as_ref().map_or(false, CompactionWorker::is_running)
    }
}
