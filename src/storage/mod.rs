//! Storage Module
//!
//! Append-only segment files and the set of segments owned by the engine.
//!
//! ## Responsibilities
//! - Append framed records to the active segment
//! - Point reads by byte offset
//! - Streaming replay of a segment for recovery and compaction
//! - Building compacted segments off to the side and installing them atomically
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── compact_000004.log      merged output of segments ≤ 4
//!   ├── segment_000005.log      closed
//!   ├── segment_000006.log      active (append handle open)
//!   └── compact_000005.log.tmp  in-flight compaction, removed on open
//! ```
//!
//! A segment file is nothing but records laid end to end (see
//! [`crate::record`]); there is no header, footer or index block.

mod builder;
mod iterator;
mod layout;
mod manager;
mod segment;

pub use builder::SegmentBuilder;
pub use iterator::{ReplayEntry, SegmentIterator};
pub use layout::{list_dir, DirListing, SegmentFile, SegmentKind};
pub use manager::SegmentSet;
pub use segment::{LocalEntry, ReplaySummary, Segment};
