//! History records.

use bytes::Bytes;

/// Fixed part of an encoded record: kind, id and payload length.
pub const RECORD_HEADER_LEN: usize = 8 + 4 + 4;

/// One step of an item's local history.
///
/// `kind` identifies the step type (it is an item reference stored as a
/// long), `record_id` is unique within the item's history, and `payload`
/// is opaque to everything but the code that created the step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryRecord {
    kind: i64,
    record_id: i32,
    payload: Bytes,
}

impl HistoryRecord {
    /// Creates a record.
    pub fn new(kind: i64, record_id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            record_id,
            payload: payload.into(),
        }
    }

    /// Step type.
    pub fn kind(&self) -> i64 {
        self.kind
    }

    /// Id within the item's history.
    pub fn record_id(&self) -> i32 {
        self.record_id
    }

    /// Step payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Length of this record in the flat format.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.payload.len()
    }
}

/// Returns the id for a record appended after `records`.
pub fn next_record_id(records: &[HistoryRecord]) -> i32 {
    records
        .iter()
        .map(HistoryRecord::record_id)
        .max()
        .map_or(0, |max| max.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_id_follows_maximum() {
        assert_eq!(next_record_id(&[]), 0);
        let records = vec![
            HistoryRecord::new(1, 4, Bytes::new()),
            HistoryRecord::new(1, 2, Bytes::new()),
        ];
        assert_eq!(next_record_id(&records), 5);
    }

    #[test]
    fn encoded_len_counts_header() {
        let record = HistoryRecord::new(7, 0, Bytes::from_static(b"abc"));
        assert_eq!(record.encoded_len(), 19);
    }
}
