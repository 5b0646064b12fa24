//! Segment Iterator
//!
//! Sequential, record-at-a-time replay of a segment file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{EmberError, Result};
use crate::record::{self, LENGTH_PREFIX_SIZE, RECORD_OVERHEAD};

/// One record seen during replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEntry {
    pub key: Vec<u8>,
    /// Byte offset of the record within its segment
    pub offset: u64,
    /// Framed size of the record
    pub size: u32,
    pub tombstone: bool,
}

/// Iterator over the records of a segment in write order
///
/// Reads through its own file handle, so it never contends with point reads.
/// A trailing record that runs past the end of the scanned range is treated
/// as a torn write: iteration stops and the leftover byte count is reported
/// by [`truncated_bytes`](Self::truncated_bytes).
pub struct SegmentIterator {
    reader: BufReader<File>,
    /// Offset of the next record (end of the last good one)
    position: u64,
    /// Stop reading at this offset
    limit: u64,
    truncated_bytes: u64,
    done: bool,
}

impl SegmentIterator {
    /// Replay `path` up to `limit` bytes (the whole file when `None`)
    pub(crate) fn open(path: &Path, limit: Option<u64>) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let limit = limit.map_or(file_len, |l| l.min(file_len));

        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            limit,
            truncated_bytes: 0,
            done: false,
        })
    }

    /// End offset of the last complete record read so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes of a torn trailing record that were skipped
    pub fn truncated_bytes(&self) -> u64 {
        self.truncated_bytes
    }

    /// Whether the next `len` bytes are all zero
    fn rest_is_zero(&mut self, len: u64) -> Result<bool> {
        let mut rest = (&mut self.reader).take(len);
        let mut chunk = [0u8; 4096];
        loop {
            let n = rest.read(&mut chunk)?;
            if n == 0 {
                return Ok(true);
            }
            if chunk[..n].iter().any(|&b| b != 0) {
                return Ok(false);
            }
        }
    }

    fn read_next(&mut self) -> Result<Option<ReplayEntry>> {
        let remaining = self.limit - self.position;
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < LENGTH_PREFIX_SIZE as u64 {
            self.truncated_bytes = remaining;
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        self.reader.read_exact(&mut prefix)?;
        let size = record::peek_length(&prefix);

        if (size as usize) < RECORD_OVERHEAD {
            // Preallocated but never written: the file ends in zeros
            if size == 0 && self.rest_is_zero(remaining - LENGTH_PREFIX_SIZE as u64)? {
                self.truncated_bytes = remaining;
                return Ok(None);
            }
            return Err(EmberError::CorruptRecord(format!(
                "record at offset {} declares {} bytes",
                self.position, size
            )));
        }
        if size as u64 > remaining {
            // Torn write at the tail
            self.truncated_bytes = remaining;
            return Ok(None);
        }

        let mut buf = vec![0u8; size as usize];
        buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix);
        self.reader.read_exact(&mut buf[LENGTH_PREFIX_SIZE..])?;

        let record = record::decode(&buf).map_err(|e| match e {
            EmberError::CorruptRecord(msg) => {
                EmberError::CorruptRecord(format!("offset {}: {}", self.position, msg))
            }
            other => other,
        })?;

        let entry = ReplayEntry {
            key: record.key.to_vec(),
            offset: self.position,
            size,
            tombstone: record.is_tombstone(),
        };
        self.position += size as u64;

        Ok(Some(entry))
    }
}

impl Iterator for SegmentIterator {
    type Item = Result<ReplayEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_next() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
