//! Property-based test generators using proptest.

use crate::attrs::{PRIORITY, SUMMARY};
use bytes::Bytes;
use itemsync_codec::HistoryRecord;
use itemsync_core::SyncState;
use itemsync_store::{AttributeMap, ItemId};
use proptest::prelude::*;

/// Strategy for item ids in `1..=max`.
pub fn item_id_strategy(max: u64) -> impl Strategy<Value = ItemId> {
    (1..=max).prop_map(ItemId::new)
}

/// Strategy for sets of item ids, sorted and without duplicates.
pub fn item_set_strategy(max: u64, len: usize) -> impl Strategy<Value = Vec<ItemId>> {
    prop::collection::btree_set(1..=max, 0..=len)
        .prop_map(|ids| ids.into_iter().map(ItemId::new).collect())
}

/// Strategy for sync states.
pub fn sync_state_strategy() -> impl Strategy<Value = SyncState> {
    prop::sample::select(SyncState::ALL.to_vec())
}

/// Strategy for one history record.
pub fn history_record_strategy() -> impl Strategy<Value = HistoryRecord> {
    (
        any::<i64>(),
        any::<i32>(),
        prop::collection::vec(any::<u8>(), 0..64),
    )
        .prop_map(|(kind, id, payload)| HistoryRecord::new(kind, id, Bytes::from(payload)))
}

/// Strategy for a history log.
pub fn history_strategy() -> impl Strategy<Value = Vec<HistoryRecord>> {
    prop::collection::vec(history_record_strategy(), 0..16)
}

/// Strategy for issue values over summary and priority, either possibly
/// absent.
pub fn issue_values_strategy() -> impl Strategy<Value = AttributeMap> {
    (
        prop::option::of("[a-z]{1,8}"),
        prop::option::of(0i64..5),
    )
        .prop_map(|(summary, priority)| {
            let mut values = AttributeMap::new();
            if let Some(summary) = summary {
                values = values.with(&SUMMARY, summary);
            }
            if let Some(priority) = priority {
                values = values.with(&PRIORITY, priority);
            }
            values
        })
}
