//! The TRUNK drain used by edit commits.

use crate::branch::{collect_base, last_server, trunk_shadowables, BranchSelector};
use crate::edit::EditCounterpart;
use crate::history;
use crate::manager::ManagerInner;
use crate::merge::{clear_server_shadows, copy_to_trunk};
use crate::schema::{self, BASE, CONFLICT, DONE_UPLOAD_HISTORY, EXISTING, HISTORY};
use crate::version::{slave_subtree, Drain, DrainOps, ItemVersionCreator};
use bytes::Bytes;
use itemsync_store::{Aborted, Attribute, AttributeMap, ItemId, Reader, Value, Writer};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// Longest master chain followed when checking write access.
const MAX_MASTER_DEPTH: usize = 16;

/// Concurrent editors to notify of unsafe changes, with the new values.
pub(crate) type Notifications = Vec<(Arc<EditCounterpart>, BTreeMap<ItemId, AttributeMap>)>;

/// What a finished edit drain hands to the commit pipeline.
pub(crate) struct EditOutcome {
    pub(crate) changed: BTreeSet<ItemId>,
    pub(crate) notifications: Notifications,
}

/// Write access for an [`EditCommit`](crate::EditCommit).
///
/// Writes go to TRUNK. The first shadowable write to an item records its
/// BASE, so the server state the edit started from is kept. Shadowable
/// writes are allowed on items locked by the committing edit, on items
/// created in this transaction and on items passed to
/// [`EditDrain::unsafe_change`]; any other one aborts the transaction.
pub struct EditDrain<'a> {
    writer: &'a mut dyn Writer,
    manager: &'a ManagerInner,
    owner: Option<Arc<EditCounterpart>>,
    bases: BTreeMap<ItemId, AttributeMap>,
    created: BTreeSet<ItemId>,
    unsafe_items: BTreeSet<ItemId>,
    changed: BTreeSet<ItemId>,
    refusal: Option<Aborted>,
}

impl<'a> EditDrain<'a> {
    pub(crate) fn new(
        writer: &'a mut dyn Writer,
        manager: &'a ManagerInner,
        owner: Option<Arc<EditCounterpart>>,
        bases: BTreeMap<ItemId, AttributeMap>,
    ) -> Self {
        Self {
            writer,
            manager,
            owner,
            bases,
            created: BTreeSet::new(),
            unsafe_items: BTreeSet::new(),
            changed: BTreeSet::new(),
            refusal: None,
        }
    }

    /// Creator for an item this edit does not lock.
    ///
    /// The write does not wait for the item's editor: that editor is told
    /// of the new values after the commit, and its own later commit may
    /// overwrite them. Meant for attributes whose merge is safe.
    pub fn unsafe_change(&mut self, item: ItemId) -> ItemVersionCreator<'_> {
        self.unsafe_items.insert(item);
        ItemVersionCreator::new(self, item)
    }

    /// Returns true if `item` was created by this transaction.
    pub fn is_created(&self, item: ItemId) -> bool {
        self.created.contains(&item)
    }

    /// Items written so far.
    pub fn changed_items(&self) -> &BTreeSet<ItemId> {
        &self.changed
    }

    /// Restores the last server state of `root` and its slave subtree,
    /// dropping local changes, pending history and server shadows.
    pub fn discard_changes(&mut self, root: ItemId) {
        if !self.may_write(root) {
            self.refuse(root, "discard");
            return;
        }
        let mut items = vec![root];
        items.extend(slave_subtree(self.writer.as_reader(), root));
        for item in items {
            let Some(server) = last_server(self.writer.as_reader(), item) else {
                continue;
            };
            copy_to_trunk(self.writer, item, &server);
            if let Err(err) = clear_server_shadows(self.writer, item) {
                self.refusal.get_or_insert(err);
                return;
            }
            self.writer.set(item, &HISTORY, None);
            self.writer.set(item, &DONE_UPLOAD_HISTORY, None);
            self.changed.insert(item);
        }
    }

    /// Promotes CONFLICT to BASE: the user resolved the conflict by hand
    /// and TRUNK now holds the result.
    pub fn mark_merged(&mut self, item: ItemId) {
        if !self.may_write(item) {
            self.refuse(item, "mark merged");
            return;
        }
        if let Some(conflict) = self.writer.as_reader().get_map(item, &CONFLICT) {
            self.writer.set(item, &BASE, Some(Value::Map(conflict)));
            self.writer.set(item, &CONFLICT, None);
            self.changed.insert(item);
        }
    }

    fn is_owned(&self, item: ItemId) -> bool {
        self.owner.as_ref().is_some_and(|owner| {
            self.manager
                .locks
                .holder(item)
                .is_some_and(|holder| Arc::ptr_eq(&holder, owner))
        })
    }

    /// Slaves are writable through a writable master.
    fn may_write(&self, item: ItemId) -> bool {
        let reader = self.writer.as_reader();
        let mut current = item;
        for _ in 0..MAX_MASTER_DEPTH {
            if self.may_write_own(current) {
                return true;
            }
            match master_of(reader, current) {
                Some(master) if master != current => current = master,
                _ => return false,
            }
        }
        false
    }

    fn may_write_own(&self, item: ItemId) -> bool {
        self.created.contains(&item)
            || self.bases.contains_key(&item)
            || self.unsafe_items.contains(&item)
            || self.is_owned(item)
            || !self.writer.as_reader().get_flag(item, &EXISTING)
    }

    fn refuse(&mut self, item: ItemId, action: &str) {
        warn!(item = %item, action, "write refused, item is not locked by this edit");
        self.refusal
            .get_or_insert_with(|| Aborted::new(format!("{action} of {item} without a lock")));
    }

    /// Makes sure BASE holds the state local changes are made against.
    fn before_shadowable_changed(&mut self, item: ItemId) -> bool {
        if !self.may_write(item) {
            return false;
        }
        let reader = self.writer.as_reader();
        if reader.get(item, &BASE).is_some() {
            return true;
        }
        let base = if self.created.contains(&item) || !reader.get_flag(item, &EXISTING) {
            schema::invisible_map()
        } else if let Some(base) = self.bases.get(&item) {
            base.clone()
        } else if self.unsafe_items.contains(&item) {
            self.manager
                .locks
                .holder(item)
                .and_then(|holder| holder.base(item))
                .unwrap_or_else(|| trunk_shadowables(reader, item))
        } else {
            collect_base(reader, item)
        };
        self.writer.set(item, &BASE, Some(Value::Map(base)));
        true
    }

    pub(crate) fn finish(self) -> Result<EditOutcome, Aborted> {
        if let Some(refusal) = self.refusal {
            return Err(refusal);
        }
        let mut notifications: Notifications = Vec::new();
        if self.manager.config.notify_concurrent_edits {
            let reader = self.writer.as_reader();
            for item in self.unsafe_items.intersection(&self.changed) {
                let Some(holder) = self.manager.locks.holder(*item) else {
                    continue;
                };
                if self.owner.as_ref().is_some_and(|owner| Arc::ptr_eq(owner, &holder)) {
                    continue;
                }
                let values = trunk_shadowables(reader, *item);
                match notifications.iter_mut().find(|(other, _)| Arc::ptr_eq(other, &holder)) {
                    Some((_, changes)) => {
                        changes.insert(*item, values);
                    }
                    None => notifications.push((holder, BTreeMap::from([(*item, values)]))),
                }
            }
        }
        Ok(EditOutcome {
            changed: self.changed,
            notifications,
        })
    }
}

impl DrainOps for EditDrain<'_> {
    fn txn_reader(&self) -> &dyn Reader {
        self.writer.as_reader()
    }

    fn write_selector(&self) -> BranchSelector {
        BranchSelector::TRUNK
    }

    fn write_value(&mut self, item: ItemId, attribute: &Attribute, value: Option<Value>) {
        if attribute.is_shadowable() && !self.before_shadowable_changed(item) {
            self.refuse(item, "write");
            return;
        }
        self.writer.set(item, attribute, value);
        self.changed.insert(item);
    }

    fn add_history(&mut self, item: ItemId, kind: i64, payload: Bytes) -> i32 {
        if !self.before_shadowable_changed(item) {
            self.refuse(item, "history append");
            return -1;
        }
        self.changed.insert(item);
        match history::append_history(self.writer, item, kind, payload) {
            Ok(id) => id,
            Err(err) => {
                self.refusal.get_or_insert(err);
                -1
            }
        }
    }

    fn mark_merged(&mut self, item: ItemId) {
        EditDrain::mark_merged(self, item);
    }

    fn new_item(&mut self) -> ItemId {
        let item = self.writer.create_item();
        self.created.insert(item);
        self.writer.set(item, &EXISTING, Some(Value::Bool(true)));
        self.writer
            .set(item, &BASE, Some(Value::Map(schema::invisible_map())));
        self.changed.insert(item);
        item
    }
}

impl Drain for EditDrain<'_> {
    fn reader(&self) -> &dyn Reader {
        self.writer.as_reader()
    }

    fn change_item(&mut self, item: ItemId) -> ItemVersionCreator<'_> {
        ItemVersionCreator::new(self, item)
    }

    fn create_item(&mut self) -> ItemVersionCreator<'_> {
        let item = self.new_item();
        ItemVersionCreator::new(self, item)
    }
}

fn master_of(reader: &dyn Reader, item: ItemId) -> Option<ItemId> {
    reader
        .values(item)
        .iter()
        .find(|(attribute, _)| attribute.is_master_ref())
        .and_then(|(_, value)| value.as_item())
}
