//! Attribute-level differences between two states of an item.

use crate::history;
use itemsync_codec::HistoryRecord;
use itemsync_store::{values_equal, Attribute, AttributeMap, ItemId, Reader, Value};
use std::collections::BTreeSet;

/// Difference between an older and a newer state of one item.
///
/// `changed` starts as the mechanically detected set of attributes whose
/// values differ and may be widened with [`ItemDiff::add_change`].
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDiff {
    item: ItemId,
    older: AttributeMap,
    newer: AttributeMap,
    changed: BTreeSet<Attribute>,
    history: Vec<HistoryRecord>,
    history_changed: bool,
}

impl ItemDiff {
    /// Diff between two shadowable value maps, without history.
    pub fn between(item: ItemId, older: AttributeMap, newer: AttributeMap) -> Self {
        let changed = changed_attributes(&older, &newer);
        Self {
            item,
            older,
            newer,
            changed,
            history: Vec::new(),
            history_changed: false,
        }
    }

    /// Local diff: `older` against the current TRUNK, including pending
    /// history unless `skip_history`.
    pub fn local(reader: &dyn Reader, item: ItemId, older: AttributeMap, skip_history: bool) -> Self {
        let newer = crate::branch::trunk_shadowables(reader, item);
        let mut diff = Self::between(item, older, newer);
        if !skip_history {
            diff.history = history::pending_history(reader, item);
        }
        diff
    }

    /// Item the diff is about.
    pub fn item(&self) -> ItemId {
        self.item
    }

    /// Returns true if any attribute changed or history is pending.
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || self.has_history()
    }

    /// Changed attributes.
    pub fn changed(&self) -> &BTreeSet<Attribute> {
        &self.changed
    }

    /// Returns true if `attribute` is in the changed set.
    pub fn is_changed(&self, attribute: &Attribute) -> bool {
        self.changed.contains(attribute)
    }

    /// Adds an attribute to the changed set even if its values are equal.
    pub fn add_change(&mut self, attribute: &Attribute) {
        self.changed.insert(attribute.clone());
    }

    /// Value in the older state.
    pub fn old_value(&self, attribute: &Attribute) -> Option<&Value> {
        self.older.get(attribute)
    }

    /// Value in the newer state.
    pub fn new_value(&self, attribute: &Attribute) -> Option<&Value> {
        self.newer.get(attribute)
    }

    /// Older state.
    pub fn older(&self) -> &AttributeMap {
        &self.older
    }

    /// Newer state.
    pub fn newer(&self) -> &AttributeMap {
        &self.newer
    }

    /// Pending history records carried by the diff.
    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    /// Returns true if history records are pending.
    pub fn has_history(&self) -> bool {
        !self.history.is_empty()
    }

    /// Drops a history record from the diff. Returns false if no record
    /// has that id.
    pub fn remove_history_record(&mut self, record_id: i32) -> bool {
        let before = self.history.len();
        self.history.retain(|record| record.record_id() != record_id);
        let removed = self.history.len() != before;
        self.history_changed |= removed;
        removed
    }

    /// The history after removals, `None` if nothing was removed.
    pub fn updated_history(&self) -> Option<&[HistoryRecord]> {
        self.history_changed.then_some(self.history.as_slice())
    }
}

/// Attributes whose values differ between two maps.
pub fn changed_attributes(older: &AttributeMap, newer: &AttributeMap) -> BTreeSet<Attribute> {
    older
        .keys()
        .chain(newer.keys())
        .filter(|attribute| !values_equal(older.get(attribute), newer.get(attribute)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use itemsync_store::ValueKind;

    fn attrs() -> (Attribute, Attribute, Attribute) {
        (
            Attribute::shadowable("test.a", ValueKind::Text),
            Attribute::shadowable("test.b", ValueKind::Int),
            Attribute::shadowable("test.c", ValueKind::RefList),
        )
    }

    #[test]
    fn detects_changed_added_and_removed() {
        let (a, b, c) = attrs();
        let older = AttributeMap::new().with(&a, "x").with(&b, 1);
        let newer = AttributeMap::new().with(&a, "y").with(&c, vec![ItemId::new(1)]);
        let diff = ItemDiff::between(ItemId::new(1), older, newer);
        assert_eq!(diff.changed(), &BTreeSet::from([a.clone(), b.clone(), c.clone()]));
        assert_eq!(diff.old_value(&a), Some(&Value::from("x")));
        assert_eq!(diff.new_value(&b), None);
        assert!(diff.has_changes());
    }

    #[test]
    fn equal_maps_have_no_changes() {
        let (a, _, c) = attrs();
        let map = AttributeMap::new().with(&a, "x");
        let mut diff = ItemDiff::between(ItemId::new(1), map.clone(), map);
        assert!(!diff.has_changes());
        diff.add_change(&c);
        assert!(diff.is_changed(&c));
    }

    #[test]
    fn history_removal_is_tracked() {
        let mut diff = ItemDiff::between(ItemId::new(1), AttributeMap::new(), AttributeMap::new());
        diff.history = vec![
            HistoryRecord::new(1, 0, Bytes::from_static(b"a")),
            HistoryRecord::new(1, 1, Bytes::from_static(b"b")),
        ];
        assert!(diff.has_changes());
        assert_eq!(diff.updated_history(), None);
        assert!(!diff.remove_history_record(9));
        assert!(diff.remove_history_record(0));
        assert_eq!(diff.updated_history().map(<[_]>::len), Some(1));
    }
}
