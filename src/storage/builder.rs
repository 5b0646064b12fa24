//! Segment Builder
//!
//! Writes a brand-new compacted segment off to the side.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{EmberError, Result};
use crate::record;

use super::layout::{self, SegmentFile};
use super::segment::{LocalEntry, Segment};

/// Builder for compacted segments
///
/// Records go to `compact_{id}.log.tmp`; `finish()` fsyncs the file and
/// renames it into place, so a `compact_*` file on disk is always complete.
pub struct SegmentBuilder {
    dir: PathBuf,
    file: SegmentFile,
    temp_path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Current write position
    offset: u64,
    /// Key → offset of every record written
    local_index: HashMap<Vec<u8>, LocalEntry>,
}

impl SegmentBuilder {
    /// Start a compacted segment with the given id
    pub fn new(dir: &Path, id: u64) -> Result<Self> {
        let file = SegmentFile::compacted(id);
        let temp_path = file.temp_path_in(dir);

        let out = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            temp_path,
            writer: BufWriter::new(out),
            offset: 0,
            local_index: HashMap::new(),
        })
    }

    /// Add a live key-value pair; returns its offset in the new segment
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<u64> {
        let bytes = record::encode(key, Some(value))?;
        let offset = self.offset;

        self.writer.write_all(&bytes)?;
        self.offset += bytes.len() as u64;
        self.local_index.insert(
            key.to_vec(),
            LocalEntry {
                offset,
                tombstone: false,
            },
        );

        Ok(offset)
    }

    /// Bytes written so far
    pub fn size(&self) -> u64 {
        self.offset
    }

    /// Number of records written so far
    pub fn record_count(&self) -> usize {
        self.local_index.len()
    }

    /// fsync, rename into place and open the result as a sealed segment
    pub fn finish(self) -> Result<Segment> {
        let final_path = self.file.path_in(&self.dir);
        if final_path.exists() {
            let name = final_path.display().to_string();
            self.discard();
            return Err(EmberError::Storage(format!("{} already exists", name)));
        }

        let Self {
            dir,
            file,
            temp_path,
            writer,
            offset,
            local_index,
        } = self;

        let out = writer.into_inner().map_err(|e| {
            EmberError::Storage(format!("Failed to flush compacted segment: {}", e))
        })?;
        out.sync_all()?;
        drop(out);

        fs::rename(&temp_path, &final_path)?;
        layout::sync_dir(&dir)?;

        Segment::sealed(&dir, file, offset, local_index)
    }

    /// Throw away the partial output
    pub fn discard(self) {
        drop(self.writer);
        if let Err(e) = fs::remove_file(&self.temp_path) {
            tracing::warn!(
                path = %self.temp_path.display(),
                error = %e,
                "failed to remove partial compaction output"
            );
        }
    }
}
