//! Branch-aware item views and creators.
//!
//! [`Readable`] is the read capability shared by every view, [`Writable`]
//! adds mutation, and [`Drain`] hands out creators inside a write
//! transaction. Concrete types compose them explicitly.

use crate::branch::{self, Branch, BranchSelector};
use crate::history;
use crate::schema::{EXISTING, INVISIBLE};
use crate::state::SyncState;
use bytes::Bytes;
use itemsync_codec::HistoryRecord;
use itemsync_store::{Attribute, AttributeMap, ItemId, Query, Reader, Value};
use std::collections::{BTreeSet, VecDeque};

/// Read access to one item through a branch selector.
pub trait Readable {
    /// Transaction the view reads from.
    fn reader(&self) -> &dyn Reader;

    /// Item being viewed.
    fn item(&self) -> ItemId;

    /// Branch selection policy of the view.
    fn selector(&self) -> BranchSelector;

    /// Branch the selector resolves to right now.
    fn branch(&self) -> Branch {
        self.selector().resolve(self.reader(), self.item())
    }

    /// Value of an attribute on the selected branch.
    fn value(&self, attribute: &Attribute) -> Option<Value> {
        branch::read_value(self.reader(), self.item(), self.branch(), attribute)
    }

    /// Shadowable values of the selected branch.
    fn values(&self) -> AttributeMap {
        branch::branch_values(self.reader(), self.item(), self.branch()).unwrap_or_default()
    }

    /// Items referenced by a reference attribute, as a set.
    fn long_set(&self, attribute: &Attribute) -> BTreeSet<ItemId> {
        self.value(attribute)
            .map(|value| value.referenced_items().into_iter().collect())
            .unwrap_or_default()
    }

    /// The selected branch marks the item deleted.
    fn is_invisible(&self) -> bool {
        matches!(self.value(&INVISIBLE), Some(Value::Bool(true)))
    }

    /// The item exists locally and is not deleted on the selected branch.
    fn is_alive(&self) -> bool {
        self.reader().get_flag(self.item(), &EXISTING) && !self.is_invisible()
    }

    /// Items whose `master` attribute refers to this item.
    fn slaves(&self, master: &Attribute) -> Vec<ItemId> {
        self.reader().query(&Query::refers_to(master, self.item()))
    }

    /// Every item below this one through master-reference attributes,
    /// breadth first, excluding the item itself.
    fn slaves_recursive(&self) -> Vec<ItemId> {
        slave_subtree(self.reader(), self.item())
    }

    /// Derived sync state.
    fn sync_state(&self) -> SyncState {
        SyncState::of(self.reader(), self.item())
    }

    /// Pending history records.
    fn history(&self) -> Vec<HistoryRecord> {
        history::pending_history(self.reader(), self.item())
    }
}

/// Mutation through a creator.
///
/// Every write goes to the branch the owning drain writes to. A creator
/// pinned to any other branch panics on write.
pub trait Writable: Readable {
    /// Sets or clears an attribute.
    fn set_value(&mut self, attribute: &Attribute, value: Option<Value>);

    /// Marks the item and its slave subtree deleted.
    fn delete(&mut self);

    /// Marks the item existing and not deleted.
    fn set_alive(&mut self);

    /// Promotes a CONFLICT shadow to BASE, accepting the current TRUNK as
    /// resolved against it.
    fn mark_merged(&mut self);

    /// Appends a history record and returns its id.
    fn add_history(&mut self, kind: i64, payload: Bytes) -> i32;

    /// Sets an attribute.
    fn set(&mut self, attribute: &Attribute, value: impl Into<Value>)
    where
        Self: Sized,
    {
        self.set_value(attribute, Some(value.into()));
    }

    /// Sets a reference-list attribute.
    fn set_list(&mut self, attribute: &Attribute, items: Vec<ItemId>) {
        self.set_value(attribute, Some(Value::RefList(items)));
    }

    /// Sets a reference-set attribute.
    fn set_set(&mut self, attribute: &Attribute, items: BTreeSet<ItemId>) {
        self.set_value(attribute, Some(Value::RefSet(items)));
    }

    /// Adds one reference to a list or set attribute.
    fn add_value(&mut self, attribute: &Attribute, item: ItemId) {
        let value = match self.value(attribute) {
            Some(Value::RefList(mut list)) => {
                if !list.contains(&item) {
                    list.push(item);
                }
                Value::RefList(list)
            }
            Some(Value::RefSet(mut set)) => {
                set.insert(item);
                Value::RefSet(set)
            }
            _ => match attribute.kind() {
                itemsync_store::ValueKind::RefList => Value::RefList(vec![item]),
                _ => Value::RefSet(BTreeSet::from([item])),
            },
        };
        self.set_value(attribute, Some(value));
    }

    /// Clears an attribute.
    fn clear(&mut self, attribute: &Attribute) {
        self.set_value(attribute, None);
    }
}

/// A read-only view of one item.
#[derive(Clone, Copy)]
pub struct ItemVersion<'r> {
    reader: &'r dyn Reader,
    item: ItemId,
    selector: BranchSelector,
}

impl<'r> ItemVersion<'r> {
    /// Creates a view.
    pub fn new(reader: &'r dyn Reader, item: ItemId, selector: BranchSelector) -> Self {
        Self {
            reader,
            item,
            selector,
        }
    }

    /// The same item read through the server policy.
    #[must_use]
    pub fn switch_to_server(self) -> Self {
        Self {
            selector: BranchSelector::FollowServer,
            ..self
        }
    }

    /// The same item read on TRUNK.
    #[must_use]
    pub fn switch_to_trunk(self) -> Self {
        Self {
            selector: BranchSelector::TRUNK,
            ..self
        }
    }

    /// Another item through the same selector.
    pub fn for_item(&self, item: ItemId) -> ItemVersion<'r> {
        ItemVersion::new(self.reader, item, self.selector)
    }
}

impl Readable for ItemVersion<'_> {
    fn reader(&self) -> &dyn Reader {
        self.reader
    }

    fn item(&self) -> ItemId {
        self.item
    }

    fn selector(&self) -> BranchSelector {
        self.selector
    }
}

/// Hands out item versions bound to a selection policy.
///
/// Versions borrow the reader, not the source, so they outlive a
/// temporary source.
pub trait VersionSource<'r> {
    /// Transaction the versions read from.
    fn reader(&self) -> &'r dyn Reader;

    /// Selection policy of this source.
    fn selector(&self) -> BranchSelector;

    /// Version of `item` through this source's policy.
    fn for_item(&self, item: ItemId) -> ItemVersion<'r> {
        ItemVersion::new(self.reader(), item, self.selector())
    }

    /// TRUNK version of `item`, whatever this source's policy.
    fn read_trunk(&self, item: ItemId) -> ItemVersion<'r> {
        ItemVersion::new(self.reader(), item, BranchSelector::TRUNK)
    }
}

/// A [`VersionSource`] over a reader.
#[derive(Clone, Copy)]
pub struct BranchSource<'r> {
    reader: &'r dyn Reader,
    selector: BranchSelector,
}

impl<'r> BranchSource<'r> {
    /// TRUNK source.
    pub fn trunk(reader: &'r dyn Reader) -> Self {
        Self {
            reader,
            selector: BranchSelector::TRUNK,
        }
    }

    /// Server source.
    pub fn server(reader: &'r dyn Reader) -> Self {
        Self {
            reader,
            selector: BranchSelector::FollowServer,
        }
    }

    /// Same reader, server policy.
    #[must_use]
    pub fn switch_to_server(self) -> Self {
        Self::server(self.reader)
    }

    /// Same reader, TRUNK policy.
    #[must_use]
    pub fn switch_to_trunk(self) -> Self {
        Self::trunk(self.reader)
    }
}

impl<'r> VersionSource<'r> for BranchSource<'r> {
    fn reader(&self) -> &'r dyn Reader {
        self.reader
    }

    fn selector(&self) -> BranchSelector {
        self.selector
    }
}

/// The drain side of a creator: where its writes actually go.
pub(crate) trait DrainOps {
    fn txn_reader(&self) -> &dyn Reader;

    /// Selector the drain writes through.
    fn write_selector(&self) -> BranchSelector;

    fn write_value(&mut self, item: ItemId, attribute: &Attribute, value: Option<Value>);

    fn add_history(&mut self, item: ItemId, kind: i64, payload: Bytes) -> i32;

    fn mark_merged(&mut self, item: ItemId);

    fn new_item(&mut self) -> ItemId;

    /// Marks `item` and its slave subtree deleted.
    fn delete_item(&mut self, item: ItemId) {
        let mut doomed = vec![item];
        doomed.extend(slave_subtree(self.txn_reader(), item));
        for item in doomed {
            self.write_value(item, &INVISIBLE, Some(Value::Bool(true)));
        }
    }
}

/// A writable view of one item inside a drain.
pub struct ItemVersionCreator<'d> {
    drain: &'d mut dyn DrainOps,
    item: ItemId,
    selector: BranchSelector,
}

impl<'d> ItemVersionCreator<'d> {
    pub(crate) fn new(drain: &'d mut dyn DrainOps, item: ItemId) -> Self {
        let selector = drain.write_selector();
        Self {
            drain,
            item,
            selector,
        }
    }

    /// Rebinds the creator to another selector. Reads follow it; writes
    /// panic unless it is the drain's own.
    #[must_use]
    pub fn with_selector(self, selector: BranchSelector) -> Self {
        Self { selector, ..self }
    }

    /// Read-only view of the same item on TRUNK.
    pub fn read_trunk(&self) -> ItemVersion<'_> {
        ItemVersion::new(self.drain.txn_reader(), self.item, BranchSelector::TRUNK)
    }

    /// Read-only view of the same item through the server policy.
    pub fn read_server(&self) -> ItemVersion<'_> {
        ItemVersion::new(self.drain.txn_reader(), self.item, BranchSelector::FollowServer)
    }

    fn ensure_writable(&self) {
        let expected = self.drain.write_selector();
        assert!(
            self.selector == expected,
            "write to {} through non-writable branch {:?}, drain writes {:?}",
            self.item,
            self.selector,
            expected
        );
    }
}

impl Readable for ItemVersionCreator<'_> {
    fn reader(&self) -> &dyn Reader {
        self.drain.txn_reader()
    }

    fn item(&self) -> ItemId {
        self.item
    }

    fn selector(&self) -> BranchSelector {
        self.selector
    }
}

impl Writable for ItemVersionCreator<'_> {
    fn set_value(&mut self, attribute: &Attribute, value: Option<Value>) {
        self.ensure_writable();
        self.drain.write_value(self.item, attribute, value);
    }

    fn delete(&mut self) {
        self.ensure_writable();
        self.drain.delete_item(self.item);
    }

    fn set_alive(&mut self) {
        self.ensure_writable();
        self.drain
            .write_value(self.item, &EXISTING, Some(Value::Bool(true)));
        self.drain.write_value(self.item, &INVISIBLE, None);
    }

    fn mark_merged(&mut self) {
        self.ensure_writable();
        self.drain.mark_merged(self.item);
    }

    fn add_history(&mut self, kind: i64, payload: Bytes) -> i32 {
        self.ensure_writable();
        self.drain.add_history(self.item, kind, payload)
    }
}

/// Write access handed to transaction bodies of the sync pipeline.
pub trait Drain {
    /// Transaction the drain writes in; reads see earlier writes.
    fn reader(&self) -> &dyn Reader;

    /// Creator for an existing item.
    fn change_item(&mut self, item: ItemId) -> ItemVersionCreator<'_>;

    /// Allocates an item and returns its creator.
    fn create_item(&mut self) -> ItemVersionCreator<'_>;
}

/// Every item below `root` through master-reference attributes.
pub fn slave_subtree(reader: &dyn Reader, root: ItemId) -> Vec<ItemId> {
    let mut seen = BTreeSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut found = Vec::new();
    while let Some(master) = queue.pop_front() {
        for slave in reader.query(&Query::SlaveOf(master)) {
            if seen.insert(slave) {
                found.push(slave);
                queue.push_back(slave);
            }
        }
    }
    found
}
