//! Segment
//!
//! One append-only file, its write offset, and its local key → offset map.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::config::SyncStrategy;
use crate::error::{EmberError, Result};
use crate::record::{self, RecordValue, LENGTH_PREFIX_SIZE, RECORD_OVERHEAD};

use super::iterator::{ReplayEntry, SegmentIterator};
use super::layout::{self, SegmentFile, SegmentKind};

/// Latest record for a key within one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEntry {
    pub offset: u64,
    pub tombstone: bool,
}

/// Outcome of scanning an existing segment file on open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Complete records found
    pub records: u64,

    /// Bytes of a torn trailing record cut from the file
    pub truncated_bytes: u64,
}

/// Long-lived append handle of the active segment
struct SegmentWriter {
    file: File,
    sync_strategy: SyncStrategy,
    /// Appends written since the last fsync
    unsynced: usize,
}

impl SegmentWriter {
    /// Write one record that starts at `offset`
    ///
    /// On failure the file is cut back to `offset` so the next append does
    /// not land behind a torn record.
    fn write_at_end(&mut self, bytes: &[u8], offset: u64) -> Result<()> {
        let result = self.file.write_all(bytes).map_err(EmberError::from).and_then(|()| {
            self.unsynced += 1;
            match self.sync_strategy {
                SyncStrategy::EveryWrite => self.sync(),
                SyncStrategy::EveryNWrites { count } if self.unsynced >= count => self.sync(),
                SyncStrategy::EveryNWrites { .. } => Ok(()),
            }
        });

        if let Err(e) = result {
            if let Err(rollback) = self.file.set_len(offset) {
                tracing::error!(
                    offset,
                    error = %rollback,
                    "failed to roll back torn append"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.unsynced > 0 {
            self.file.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }
}

/// An append-only segment file
///
/// ## Concurrency:
/// - `writer`: Mutex, only the active segment has one; `None` once sealed
/// - `reader`: Mutex around one cached read handle (seeking mutates it)
/// - `write_offset`: Atomic, readers never look past it
/// - `local_index`: RwLock
/// - All methods use `&self`, segments are shared as `Arc<Segment>`
pub struct Segment {
    file: SegmentFile,
    path: PathBuf,
    writer: Mutex<Option<SegmentWriter>>,
    reader: Mutex<BufReader<File>>,
    write_offset: AtomicU64,
    local_index: RwLock<HashMap<Vec<u8>, LocalEntry>>,
}

impl Segment {
    /// Create a new, empty segment ready for appends
    ///
    /// Fails if the file already exists.
    pub fn create(dir: &Path, file: SegmentFile, sync_strategy: SyncStrategy) -> Result<Self> {
        let path = file.path_in(dir);
        let out = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        layout::sync_dir(dir)?;

        let reader = File::open(&path)?;

        Ok(Self {
            file,
            path,
            writer: Mutex::new(Some(SegmentWriter {
                file: out,
                sync_strategy,
                unsynced: 0,
            })),
            reader: Mutex::new(BufReader::new(reader)),
            write_offset: AtomicU64::new(0),
            local_index: RwLock::new(HashMap::new()),
        })
    }

    /// Open an existing segment sealed, scanning it once
    pub fn open(dir: &Path, file: SegmentFile) -> Result<(Self, ReplaySummary)> {
        Self::open_with(dir, file, |_| {})
    }

    /// Open an existing segment sealed, handing every replayed record to `visit`
    ///
    /// A torn trailing record is cut from the file; any other inconsistency
    /// fails with `CorruptRecord`.
    pub fn open_with<F>(dir: &Path, file: SegmentFile, mut visit: F) -> Result<(Self, ReplaySummary)>
    where
        F: FnMut(&ReplayEntry),
    {
        let path = file.path_in(dir);
        let mut local_index = HashMap::new();
        let mut summary = ReplaySummary::default();

        let mut iter = SegmentIterator::open(&path, None)?;
        for entry in &mut iter {
            let entry = entry.map_err(|e| match e {
                EmberError::CorruptRecord(msg) => {
                    EmberError::CorruptRecord(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })?;
            visit(&entry);
            local_index.insert(
                entry.key,
                LocalEntry {
                    offset: entry.offset,
                    tombstone: entry.tombstone,
                },
            );
            summary.records += 1;
        }

        let valid_len = iter.position();
        summary.truncated_bytes = iter.truncated_bytes();
        drop(iter);

        if summary.truncated_bytes > 0 {
            tracing::warn!(
                segment = %path.display(),
                valid_len,
                truncated_bytes = summary.truncated_bytes,
                "discarding torn record at end of segment"
            );
            let f = OpenOptions::new().write(true).open(&path)?;
            f.set_len(valid_len)?;
            f.sync_all()?;
        }

        let segment = Self::sealed(dir, file, valid_len, local_index)?;
        Ok((segment, summary))
    }

    /// Wrap a complete file whose contents are already known
    pub(super) fn sealed(
        dir: &Path,
        file: SegmentFile,
        size: u64,
        local_index: HashMap<Vec<u8>, LocalEntry>,
    ) -> Result<Self> {
        let path = file.path_in(dir);
        let reader = File::open(&path)?;

        Ok(Self {
            file,
            path,
            writer: Mutex::new(None),
            reader: Mutex::new(BufReader::new(reader)),
            write_offset: AtomicU64::new(size),
            local_index: RwLock::new(local_index),
        })
    }

    /// Reopen the append handle so this segment can become active again
    pub fn reopen_for_append(&self, sync_strategy: SyncStrategy) -> Result<()> {
        if self.file.kind != SegmentKind::Log {
            return Err(EmberError::Storage(format!(
                "compacted segment {} cannot accept appends",
                self.file.id
            )));
        }

        let mut writer = self.writer.lock();
        if writer.is_none() {
            let file = OpenOptions::new().append(true).open(&self.path)?;
            *writer = Some(SegmentWriter {
                file,
                sync_strategy,
                unsynced: 0,
            });
        }
        Ok(())
    }

    /// Append one framed record; returns the offset it starts at
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let record = record::decode(bytes)?;
        if record.size as usize != bytes.len() {
            return Err(EmberError::CorruptRecord(format!(
                "append expects exactly one record ({} bytes), got {} bytes",
                record.size,
                bytes.len()
            )));
        }

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or_else(|| {
            EmberError::Storage(format!("segment {} is sealed", self.file.id))
        })?;

        let offset = self.write_offset.load(Ordering::Acquire);
        writer.write_at_end(bytes, offset)?;
        self.write_offset
            .store(offset + bytes.len() as u64, Ordering::Release);

        self.local_index.write().insert(
            record.key.to_vec(),
            LocalEntry {
                offset,
                tombstone: record.is_tombstone(),
            },
        );

        Ok(offset)
    }

    /// Read the record starting at `offset`
    pub fn read_at(&self, offset: u64) -> Result<RecordValue> {
        let end = self.size();
        if offset + RECORD_OVERHEAD as u64 > end {
            return Err(EmberError::CorruptRecord(format!(
                "offset {} is past the end of segment {} ({} bytes)",
                offset, self.file.id, end
            )));
        }

        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        reader.read_exact(&mut prefix).map_err(|e| self.short_read(offset, e))?;
        let size = record::peek_length(&prefix) as u64;

        if size < RECORD_OVERHEAD as u64 || offset + size > end {
            return Err(EmberError::CorruptRecord(format!(
                "record at offset {} of segment {} declares {} bytes",
                offset, self.file.id, size
            )));
        }

        let mut buf = vec![0u8; size as usize];
        buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix);
        reader
            .read_exact(&mut buf[LENGTH_PREFIX_SIZE..])
            .map_err(|e| self.short_read(offset, e))?;
        drop(reader);

        let record = record::decode(&buf)?;
        Ok(match record.value {
            Some(v) => RecordValue::Value(v.to_vec()),
            None => RecordValue::Tombstone,
        })
    }

    /// Stream every record of this segment in write order
    pub fn replay(&self) -> Result<SegmentIterator> {
        SegmentIterator::open(&self.path, Some(self.size()))
    }

    /// Flush and fsync, then drop the append handle
    pub fn seal(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.file.flush()?;
            writer.file.sync_all()?;
        }
        Ok(())
    }

    /// Force an fsync of pending appends
    pub fn sync(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.sync()?;
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u64 {
        self.file.id
    }

    pub fn kind(&self) -> SegmentKind {
        self.file.kind
    }

    pub fn file(&self) -> SegmentFile {
        self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written (the offset of the next append)
    pub fn size(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    pub fn is_sealed(&self) -> bool {
        self.writer.lock().is_none()
    }

    /// Distinct keys with a record in this segment
    pub fn key_count(&self) -> usize {
        self.local_index.read().len()
    }

    /// Latest record for `key` within this segment
    pub fn latest(&self, key: &[u8]) -> Option<LocalEntry> {
        self.local_index.read().get(key).copied()
    }

    fn short_read(&self, offset: u64, e: io::Error) -> EmberError {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            EmberError::CorruptRecord(format!(
                "record at offset {} of segment {} is cut short",
                offset, self.file.id
            ))
        } else {
            EmberError::Io(e)
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("file", &self.file)
            .field("size", &self.size())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
