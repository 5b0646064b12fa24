//! Segment file naming
//!
//! Maps segment ids to file names and back.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

const LOG_PREFIX: &str = "segment_";
const COMPACT_PREFIX: &str = "compact_";
const EXTENSION: &str = "log";
const TEMP_SUFFIX: &str = ".tmp";

/// Where a segment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SegmentKind {
    /// Written by put/delete
    Log,

    /// Written by compaction; supersedes every file with a lower id
    Compacted,
}

/// Identity of one segment file: its id and kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentFile {
    pub id: u64,
    pub kind: SegmentKind,
}

impl SegmentFile {
    pub fn log(id: u64) -> Self {
        Self {
            id,
            kind: SegmentKind::Log,
        }
    }

    pub fn compacted(id: u64) -> Self {
        Self {
            id,
            kind: SegmentKind::Compacted,
        }
    }

    /// "segment_000042.log" / "compact_000042.log"
    pub fn file_name(&self) -> String {
        let prefix = match self.kind {
            SegmentKind::Log => LOG_PREFIX,
            SegmentKind::Compacted => COMPACT_PREFIX,
        };
        format!("{}{:06}.{}", prefix, self.id, EXTENSION)
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Path used while the file is still being written
    pub fn temp_path_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.file_name(), TEMP_SUFFIX))
    }

    /// Parse a segment file name
    /// "segment_000042.log" → Some(Log 42)
    pub fn parse(path: &Path) -> Option<Self> {
        if path.extension()? != EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if let Some(id) = stem.strip_prefix(LOG_PREFIX) {
            return id.parse().ok().map(Self::log);
        }
        if let Some(id) = stem.strip_prefix(COMPACT_PREFIX) {
            return id.parse().ok().map(Self::compacted);
        }
        None
    }
}

/// Segment files found in a data directory
#[derive(Debug, Default)]
pub struct DirListing {
    /// Sorted by id, `Log` before `Compacted` for equal ids
    pub segments: Vec<SegmentFile>,

    /// Leftovers from an interrupted compaction
    pub temp_files: Vec<PathBuf>,
}

impl DirListing {
    /// Id of the newest compacted segment, if any
    pub fn newest_compacted(&self) -> Option<u64> {
        self.segments
            .iter()
            .filter(|f| f.kind == SegmentKind::Compacted)
            .map(|f| f.id)
            .max()
    }
}

/// List segment and temp files in `dir`; unrelated files are ignored
pub fn list_dir(dir: &Path) -> Result<DirListing> {
    let mut listing = DirListing::default();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }

        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(TEMP_SUFFIX));

        if is_temp {
            listing.temp_files.push(path);
        } else if let Some(file) = SegmentFile::parse(&path) {
            listing.segments.push(file);
        }
    }

    listing.segments.sort();
    Ok(listing)
}

/// fsync a directory so renames and creations inside it are durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
