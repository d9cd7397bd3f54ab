//! Slice events.

use crate::loader::LoaderKey;
use itemsync_store::{Icn, ItemId};
use std::collections::{BTreeMap, BTreeSet};

/// What one update cycle changed in a slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSliceEvent {
    /// ICN of the snapshot the cycle read.
    pub icn: Icn,
    /// Items that entered the slice.
    pub added: Vec<ItemId>,
    /// Items that left the slice.
    pub removed: Vec<ItemId>,
    /// Items that stayed in the slice with changed values.
    pub changed: Vec<ItemId>,
    changed_values: BTreeMap<ItemId, BTreeSet<LoaderKey>>,
}

impl ImageSliceEvent {
    pub(crate) fn new(
        icn: Icn,
        added: Vec<ItemId>,
        removed: Vec<ItemId>,
        changed_values: BTreeMap<ItemId, BTreeSet<LoaderKey>>,
    ) -> Self {
        Self {
            icn,
            added,
            removed,
            changed: changed_values.keys().copied().collect(),
            changed_values,
        }
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Returns true if `item` was added or any of its values changed.
    pub fn is_changed(&self, item: ItemId) -> bool {
        self.added.binary_search(&item).is_ok() || self.changed_values.contains_key(&item)
    }

    /// Returns true if `item` was added or the value of `loader` changed.
    pub fn is_attribute_changed(&self, item: ItemId, loader: LoaderKey) -> bool {
        self.added.binary_search(&item).is_ok()
            || self
                .changed_values
                .get(&item)
                .is_some_and(|loaders| loaders.contains(&loader))
    }

    /// Returns true if `item` left the slice.
    pub fn is_removed(&self, item: ItemId) -> bool {
        self.removed.binary_search(&item).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_queries() {
        let (a, b, c) = (ItemId::new(1), ItemId::new(2), ItemId::new(3));
        let event = ImageSliceEvent::new(
            Icn::new(4),
            vec![a],
            vec![c],
            BTreeMap::from([(b, BTreeSet::from([LoaderKey(1)]))]),
        );
        assert!(!event.is_empty());
        assert_eq!(event.changed, vec![b]);
        assert!(event.is_changed(a));
        assert!(event.is_changed(b));
        assert!(!event.is_changed(c));
        assert!(event.is_attribute_changed(a, LoaderKey(0)));
        assert!(event.is_attribute_changed(b, LoaderKey(1)));
        assert!(!event.is_attribute_changed(b, LoaderKey(0)));
        assert!(event.is_removed(c));
    }
}
