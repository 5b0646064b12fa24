//! Record Module
//!
//! The atomic unit written to a segment, and its binary framing.
//!
//! ## Record Format (little-endian)
//! ```text
//! ┌──────────────┬─────────────┬──────────┬───────────────┬────────────┐
//! │ TotalLen (4) │ KeyLen (4)  │   Key    │  ValueLen (4) │   Value    │
//! └──────────────┴─────────────┴──────────┴───────────────┴────────────┘
//! TotalLen = 12 + KeyLen + ValueLen
//! ```
//!
//! A tombstone stores `ValueLen = u32::MAX` and carries no value bytes, so
//! its `TotalLen` is `12 + KeyLen`. An empty value (`ValueLen = 0`) is a
//! live value and stays distinguishable from a tombstone.
//!
//! Any reader can find the next record boundary from the first 4 bytes alone,
//! which is what lets segments be replayed without a separate offset index.

mod codec;

pub use codec::{decode, encode, encoded_len, peek_length};

// =============================================================================
// Shared Constants
// =============================================================================

/// Size of the leading `TotalLen` field
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Fixed framing overhead: TotalLen (4) + KeyLen (4) + ValueLen (4)
pub const RECORD_OVERHEAD: usize = 12;

/// Sentinel `ValueLen` marking a tombstone
pub const TOMBSTONE_MARKER: u32 = u32::MAX;

// =============================================================================
// Record Types
// =============================================================================

/// Value half of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl RecordValue {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, RecordValue::Tombstone)
    }

    /// The live value, or `None` for a tombstone
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            RecordValue::Value(v) => Some(v),
            RecordValue::Tombstone => None,
        }
    }
}

/// An owned, decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: RecordValue,
}

impl Record {
    /// A live key-value record
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: RecordValue::Value(value.into()),
        }
    }

    /// A tombstone for `key`
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: RecordValue::Tombstone,
        }
    }

    /// Frame this record for writing
    pub fn encode(&self) -> crate::Result<bytes::Bytes> {
        match &self.value {
            RecordValue::Value(v) => encode(&self.key, Some(v.as_slice())),
            RecordValue::Tombstone => encode(&self.key, None),
        }
    }

    /// Framed size of this record in bytes
    pub fn encoded_len(&self) -> crate::Result<u32> {
        match &self.value {
            RecordValue::Value(v) => encoded_len(self.key.len(), Some(v.len())),
            RecordValue::Tombstone => encoded_len(self.key.len(), None),
        }
    }
}

/// A record decoded in place, borrowing from the input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef<'a> {
    pub key: &'a [u8],
    /// `None` marks a tombstone
    pub value: Option<&'a [u8]>,
    /// Value of the `TotalLen` field
    pub size: u32,
}

impl<'a> RecordRef<'a> {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn to_owned(&self) -> Record {
        Record {
            key: self.key.to_vec(),
            value: match self.value {
                Some(v) => RecordValue::Value(v.to_vec()),
                None => RecordValue::Tombstone,
            },
        }
    }
}
