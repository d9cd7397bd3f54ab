//! Per-item history log stored in `sync.history`.
//!
//! The log holds local steps that still have to reach the server. A finished
//! upload records how many leading records it confirmed in
//! `sync.doneUploadHistory`; the merge that follows drops them.

use crate::error::{SyncError, SyncResult};
use crate::schema::{DONE_UPLOAD_HISTORY, HISTORY};
use bytes::Bytes;
use itemsync_codec::{decode_history, encode_history, HistoryDecoder, HistoryRecord};
use itemsync_store::{Aborted, ItemId, Reader, Value, Writer};
use tracing::error;

/// Decodes the history of `item`.
///
/// # Errors
///
/// Returns [`SyncError::CorruptHistory`] if the stored bytes do not decode.
pub fn try_read_history(reader: &dyn Reader, item: ItemId) -> SyncResult<Vec<HistoryRecord>> {
    match reader.get(item, &HISTORY) {
        Some(Value::Bytes(bytes)) => {
            decode_history(&bytes).map_err(|source| SyncError::CorruptHistory { item, source })
        }
        _ => Ok(Vec::new()),
    }
}

/// Decodes the history of `item`, keeping the records before any corruption.
pub fn read_history(reader: &dyn Reader, item: ItemId) -> Vec<HistoryRecord> {
    let Some(Value::Bytes(bytes)) = reader.get(item, &HISTORY) else {
        return Vec::new();
    };
    let mut records = Vec::new();
    for record in HistoryDecoder::new(bytes) {
        match record {
            Ok(record) => records.push(record),
            Err(err) => {
                error!(item = %item, error = %err, kept = records.len(), "corrupt history");
                break;
            }
        }
    }
    records
}

/// Number of leading history records confirmed by a finished upload.
pub fn done_history_count(reader: &dyn Reader, item: ItemId) -> usize {
    reader
        .get(item, &DONE_UPLOAD_HISTORY)
        .and_then(|value| value.as_int())
        .and_then(|count| usize::try_from(count).ok())
        .unwrap_or(0)
}

/// History records not yet confirmed by the server.
pub fn pending_history(reader: &dyn Reader, item: ItemId) -> Vec<HistoryRecord> {
    let mut records = read_history(reader, item);
    let done = done_history_count(reader, item).min(records.len());
    records.drain(..done);
    records
}

/// Replaces the history of `item`. An empty list removes the attribute.
pub(crate) fn write_history(
    writer: &mut dyn Writer,
    item: ItemId,
    records: &[HistoryRecord],
) -> Result<(), Aborted> {
    let bytes = encode_history(records)
        .map_err(|err| Aborted::new(format!("cannot encode history of {item}: {err}")))?;
    let value = (!bytes.is_empty()).then(|| Value::Bytes(bytes));
    writer.set(item, &HISTORY, value);
    Ok(())
}

/// Strict read for the writers: rewriting a corrupt log would drop its tail.
fn read_for_update(reader: &dyn Reader, item: ItemId) -> Result<Vec<HistoryRecord>, Aborted> {
    try_read_history(reader, item).map_err(|err| Aborted::new(err.to_string()))
}

/// Appends one record and returns its id.
pub(crate) fn append_history(
    writer: &mut dyn Writer,
    item: ItemId,
    kind: i64,
    payload: Bytes,
) -> Result<i32, Aborted> {
    let mut records = read_for_update(writer.as_reader(), item)?;
    let id = itemsync_codec::next_record_id(&records);
    records.push(HistoryRecord::new(kind, id, payload));
    write_history(writer, item, &records)?;
    Ok(id)
}

/// Drops the records with the given ids.
pub(crate) fn remove_history_records(
    writer: &mut dyn Writer,
    item: ItemId,
    ids: &[i32],
) -> Result<(), Aborted> {
    if ids.is_empty() {
        return Ok(());
    }
    let mut records = read_for_update(writer.as_reader(), item)?;
    records.retain(|record| !ids.contains(&record.record_id()));
    write_history(writer, item, &records)
}

/// Drops the confirmed leading records and the confirmation count.
pub(crate) fn drop_confirmed_history(writer: &mut dyn Writer, item: ItemId) -> Result<(), Aborted> {
    let done = done_history_count(writer.as_reader(), item);
    writer.set(item, &DONE_UPLOAD_HISTORY, None);
    if done == 0 {
        return Ok(());
    }
    let mut records = read_for_update(writer.as_reader(), item)?;
    records.drain(..done.min(records.len()));
    write_history(writer, item, &records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemsync_store::Store;

    #[test]
    fn append_and_confirm() {
        let store = Store::new();
        let item = store
            .write_now(|w| {
                let item = w.create_item();
                assert_eq!(append_history(w, item, 7, Bytes::from_static(b"a"))?, 0);
                assert_eq!(append_history(w, item, 7, Bytes::from_static(b"b"))?, 1);
                assert_eq!(append_history(w, item, 8, Bytes::from_static(b"c"))?, 2);
                w.set(item, &DONE_UPLOAD_HISTORY, Some(Value::Int(2)));
                Ok(item)
            })
            .unwrap();
        store
            .read_now(|r| {
                assert_eq!(read_history(r, item).len(), 3);
                let pending = pending_history(r, item);
                assert_eq!(pending.len(), 1);
                assert_eq!(pending[0].record_id(), 2);
                Ok(())
            })
            .unwrap();
        store.write_now(|w| drop_confirmed_history(w, item)).unwrap();
        store
            .read_now(|r| {
                assert_eq!(done_history_count(r, item), 0);
                let records = read_history(r, item);
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].payload().as_ref(), b"c");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn removing_every_record_clears_attribute() {
        let store = Store::new();
        let item = store
            .write_now(|w| {
                let item = w.create_item();
                append_history(w, item, 1, Bytes::from_static(b"x"))?;
                remove_history_records(w, item, &[0])?;
                Ok(item)
            })
            .unwrap();
        assert!(store.read_now(|r| Ok(r.get(item, &HISTORY))).unwrap().is_none());
    }

    #[test]
    fn corrupt_history_keeps_prefix() {
        let store = Store::new();
        let good = encode_history(&[HistoryRecord::new(1, 0, Bytes::from_static(b"ok"))]).unwrap();
        let mut corrupt = good.to_vec();
        corrupt.extend_from_slice(&[0, 0, 0]);
        let item = store
            .write_now(move |w| {
                let item = w.create_item();
                w.set(item, &HISTORY, Some(Value::Bytes(Bytes::from(corrupt))));
                Ok(item)
            })
            .unwrap();
        store
            .read_now(|r| {
                assert_eq!(read_history(r, item).len(), 1);
                assert!(matches!(
                    try_read_history(r, item),
                    Err(SyncError::CorruptHistory { .. })
                ));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn append_refuses_corrupt_history() {
        let store = Store::new();
        let good = encode_history(&[HistoryRecord::new(1, 0, Bytes::from_static(b"ok"))]).unwrap();
        let mut corrupt = good.to_vec();
        corrupt.extend_from_slice(&[0, 0, 0]);
        let stored = Bytes::from(corrupt);
        let seed = stored.clone();
        let item = store
            .write_now(move |w| {
                let item = w.create_item();
                w.set(item, &HISTORY, Some(Value::Bytes(seed)));
                Ok(item)
            })
            .unwrap();

        let appended = store.write_now(|w| append_history(w, item, 2, Bytes::from_static(b"new")));
        assert!(appended.is_err());
        let removed = store.write_now(|w| remove_history_records(w, item, &[0]));
        assert!(removed.is_err());
        let value = store.read_now(|r| Ok(r.get(item, &HISTORY))).unwrap();
        assert_eq!(value, Some(Value::Bytes(stored)));
    }
}
