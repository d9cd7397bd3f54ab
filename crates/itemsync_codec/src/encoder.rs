//! History encoder.

use crate::error::{CodecError, CodecResult};
use crate::record::HistoryRecord;
use bytes::{BufMut, Bytes, BytesMut};

/// Encode records into the flat history format.
///
/// # Errors
///
/// Returns an error if a payload is longer than `i32::MAX` bytes.
pub fn encode_history(records: &[HistoryRecord]) -> CodecResult<Bytes> {
    let mut encoder = HistoryEncoder::with_capacity(records.iter().map(HistoryRecord::encoded_len).sum());
    for record in records {
        encoder.push(record)?;
    }
    Ok(encoder.into_bytes())
}

/// Appends records to a flat history buffer.
///
/// Each record is `i64 kind || i32 record_id || i32 length || payload`,
/// integers big-endian, records back to back with no header.
pub struct HistoryEncoder {
    buf: BytesMut,
}

impl HistoryEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Creates an encoder with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload length does not fit the length field.
    pub fn push(&mut self, record: &HistoryRecord) -> CodecResult<()> {
        let length = i32::try_from(record.payload().len()).map_err(|_| {
            CodecError::PayloadTooLarge {
                length: record.payload().len(),
            }
        })?;
        self.buf.reserve(record.encoded_len());
        self.buf.put_i64(record.kind());
        self.buf.put_i32(record.record_id());
        self.buf.put_i32(length);
        self.buf.put_slice(record.payload());
        Ok(())
    }

    /// Returns the encoded bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for HistoryEncoder {
    fn default() -> Self {
        Self::new()
    }
}
