//! Record codec
//!
//! Encoding and decoding of a single framed record.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{EmberError, Result};

use super::{RecordRef, LENGTH_PREFIX_SIZE, RECORD_OVERHEAD, TOMBSTONE_MARKER};

/// Compute the framed size of a record
///
/// `value_len = None` means tombstone. Fails with `EncodingTooLarge` when the
/// result does not fit the 32-bit `TotalLen` field.
pub fn encoded_len(key_len: usize, value_len: Option<usize>) -> Result<u32> {
    let size = RECORD_OVERHEAD as u64 + key_len as u64 + value_len.unwrap_or(0) as u64;
    u32::try_from(size).map_err(|_| EmberError::EncodingTooLarge { size })
}

/// Encode a record (`value = None` writes a tombstone)
///
/// Format: total_len (4) + key_len (4) + key + value_len (4) + value
pub fn encode(key: &[u8], value: Option<&[u8]>) -> Result<Bytes> {
    let total_len = encoded_len(key.len(), value.map(<[u8]>::len))?;

    let mut buf = BytesMut::with_capacity(total_len as usize);
    buf.put_u32_le(total_len);
    buf.put_u32_le(key.len() as u32);
    buf.put_slice(key);
    match value {
        Some(v) => {
            buf.put_u32_le(v.len() as u32);
            buf.put_slice(v);
        }
        None => buf.put_u32_le(TOMBSTONE_MARKER),
    }

    Ok(buf.freeze())
}

/// Read the `TotalLen` prefix of a record
pub fn peek_length(prefix: &[u8; LENGTH_PREFIX_SIZE]) -> u32 {
    u32::from_le_bytes(*prefix)
}

/// Decode one record from the start of `bytes`
///
/// Bytes past the declared `TotalLen` are ignored, so a caller may pass a
/// larger buffer. Fails with `CorruptRecord` if the buffer is shorter than the
/// declared size or the inner lengths disagree with it.
pub fn decode(bytes: &[u8]) -> Result<RecordRef<'_>> {
    if bytes.len() < RECORD_OVERHEAD {
        return Err(EmberError::CorruptRecord(format!(
            "need at least {} bytes, got {}",
            RECORD_OVERHEAD,
            bytes.len()
        )));
    }

    let mut buf = bytes;
    let total_len = buf.get_u32_le();
    let total = total_len as usize;

    if total < RECORD_OVERHEAD {
        return Err(EmberError::CorruptRecord(format!(
            "declared size {} is below the {} byte minimum",
            total, RECORD_OVERHEAD
        )));
    }
    if bytes.len() < total {
        return Err(EmberError::CorruptRecord(format!(
            "declared size {} but only {} bytes available",
            total,
            bytes.len()
        )));
    }

    // Restrict the cursor to this record: total - 4 bytes remain after the prefix
    let mut buf = &buf[..total - LENGTH_PREFIX_SIZE];

    let key_len = buf.get_u32_le() as usize;
    if key_len > total - RECORD_OVERHEAD {
        return Err(EmberError::CorruptRecord(format!(
            "key length {} does not fit record of {} bytes",
            key_len, total
        )));
    }
    let key = &buf[..key_len];
    buf.advance(key_len);

    let value_len = buf.get_u32_le();
    let value = if value_len == TOMBSTONE_MARKER {
        if buf.has_remaining() {
            return Err(EmberError::CorruptRecord(format!(
                "tombstone carries {} trailing bytes",
                buf.remaining()
            )));
        }
        None
    } else {
        if value_len as usize != buf.remaining() {
            return Err(EmberError::CorruptRecord(format!(
                "value length {} disagrees with the {} bytes left in the record",
                value_len,
                buf.remaining()
            )));
        }
        Some(buf)
    };

    Ok(RecordRef {
        key,
        value,
        size: total_len,
    })
}
