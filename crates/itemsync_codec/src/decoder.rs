//! History decoder.

use crate::error::{CodecError, CodecResult};
use crate::record::{HistoryRecord, RECORD_HEADER_LEN};
use bytes::{Buf, Bytes};

/// Decode a flat history buffer.
///
/// An empty buffer is an empty history.
///
/// # Errors
///
/// Returns an error if the buffer ends inside a record or declares a
/// negative payload length.
pub fn decode_history(bytes: &Bytes) -> CodecResult<Vec<HistoryRecord>> {
    let mut decoder = HistoryDecoder::new(bytes.clone());
    let mut records = Vec::new();
    while let Some(record) = decoder.next_record()? {
        records.push(record);
    }
    Ok(records)
}

/// Reads records one at a time from a flat history buffer.
///
/// Payloads are zero-copy slices of the input.
pub struct HistoryDecoder {
    data: Bytes,
    offset: usize,
}

impl HistoryDecoder {
    /// Creates a decoder over `data`.
    pub fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Reads the next record, or `None` at the end of input.
    ///
    /// # Errors
    ///
    /// Returns an error for a truncated record or a negative length.
    pub fn next_record(&mut self) -> CodecResult<Option<HistoryRecord>> {
        if !self.data.has_remaining() {
            return Ok(None);
        }
        self.require(RECORD_HEADER_LEN)?;
        let kind = self.data.get_i64();
        let record_id = self.data.get_i32();
        let length_offset = self.offset + 12;
        let length = self.data.get_i32();
        self.offset += RECORD_HEADER_LEN;
        let length = usize::try_from(length).map_err(|_| CodecError::NegativeLength {
            offset: length_offset,
            length,
        })?;
        self.require(length)?;
        let payload = self.data.split_to(length);
        self.offset += length;
        Ok(Some(HistoryRecord::new(kind, record_id, payload)))
    }

    fn require(&self, needed: usize) -> CodecResult<()> {
        let remaining = self.data.remaining();
        if remaining < needed {
            return Err(CodecError::unexpected_eof(self.offset, needed, remaining));
        }
        Ok(())
    }
}

impl Iterator for HistoryDecoder {
    type Item = CodecResult<HistoryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_history;

    #[test]
    fn empty_input_is_empty_history() {
        assert!(decode_history(&Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let record = HistoryRecord::new(5, 1, Bytes::from_static(b"payload"));
        let bytes = encode_history(&[record]).unwrap();
        let truncated = bytes.slice(..bytes.len() - 2);
        assert_eq!(
            decode_history(&truncated),
            Err(CodecError::unexpected_eof(16, 7, 5))
        );
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = decode_history(&Bytes::from_static(&[0, 0, 0])).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { needed: 16, .. }));
    }

    #[test]
    fn negative_length_is_rejected() {
        let mut raw = vec![0u8; 12];
        raw.extend_from_slice(&(-1i32).to_be_bytes());
        assert_eq!(
            decode_history(&Bytes::from(raw)),
            Err(CodecError::NegativeLength {
                offset: 12,
                length: -1
            })
        );
    }

    #[test]
    fn decoder_iterates_records() {
        let records = vec![
            HistoryRecord::new(1, 0, Bytes::from_static(b"a")),
            HistoryRecord::new(2, 1, Bytes::new()),
            HistoryRecord::new(-3, 7, Bytes::from_static(b"ccc")),
        ];
        let bytes = encode_history(&records).unwrap();
        let decoded: Vec<_> = HistoryDecoder::new(bytes)
            .collect::<CodecResult<_>>()
            .unwrap();
        assert_eq!(decoded, records);
    }
}
