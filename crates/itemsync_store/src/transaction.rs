//! Read and write transactions.
//!
//! Readers see one committed snapshot for their whole lifetime. A write
//! transaction overlays its pending writes on the snapshot it started from,
//! so everything it reads reflects its own earlier writes.

use crate::attribute::{Attribute, AttributeMap};
use crate::query::Query;
use crate::types::{Icn, ItemId};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Read access to one consistent store state.
pub trait Reader {
    /// ICN of the state being read. For a write transaction, the ICN the
    /// transaction will commit with.
    fn icn(&self) -> Icn;

    /// Returns the TRUNK value of an attribute.
    fn get(&self, item: ItemId, attribute: &Attribute) -> Option<Value>;

    /// Returns all TRUNK values of an item.
    fn values(&self, item: ItemId) -> AttributeMap;

    /// Returns the items matching `query`, in id order.
    fn query(&self, query: &Query) -> Vec<ItemId>;

    /// Returns a boolean attribute, absent meaning false.
    fn get_flag(&self, item: ItemId, attribute: &Attribute) -> bool {
        matches!(self.get(item, attribute), Some(Value::Bool(true)))
    }

    /// Returns a map-valued attribute.
    fn get_map(&self, item: ItemId, attribute: &Attribute) -> Option<AttributeMap> {
        match self.get(item, attribute) {
            Some(Value::Map(map)) => Some(map),
            _ => None,
        }
    }

    /// Returns the items referenced by an attribute, for any reference kind.
    fn get_items(&self, item: ItemId, attribute: &Attribute) -> Vec<ItemId> {
        self.get(item, attribute)
            .map(|value| value.referenced_items())
            .unwrap_or_default()
    }
}

/// Write access within one transaction.
pub trait Writer: Reader {
    /// Sets or clears a TRUNK value.
    ///
    /// # Panics
    ///
    /// Panics if the value kind does not match the attribute.
    fn set(&mut self, item: ItemId, attribute: &Attribute, value: Option<Value>);

    /// Allocates a fresh item id.
    fn create_item(&mut self) -> ItemId;

    /// Removes every value of an item.
    fn clear_item(&mut self, item: ItemId);

    /// Registers an action to run once the transaction finished, with
    /// `true` if it committed.
    fn finally_do(&mut self, action: Box<dyn FnOnce(bool) + Send>);

    /// Returns this writer as a plain reader.
    fn as_reader(&self) -> &dyn Reader;
}

/// An immutable committed state.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub(crate) icn: Icn,
    items: HashMap<ItemId, Arc<AttributeMap>>,
    last_item: u64,
}

impl Snapshot {
    fn values(&self, item: ItemId) -> Option<&AttributeMap> {
        self.items.get(&item).map(Arc::as_ref)
    }

    fn query(&self, query: &Query) -> Vec<ItemId> {
        let mut found: Vec<ItemId> = self
            .items
            .iter()
            .filter(|(_, values)| !values.is_empty() && query.matches(values))
            .map(|(item, _)| *item)
            .collect();
        found.sort_unstable();
        found
    }
}

/// A read-only transaction over one snapshot.
pub(crate) struct ReadTxn {
    snapshot: Arc<Snapshot>,
}

impl ReadTxn {
    pub(crate) fn new(snapshot: Arc<Snapshot>) -> Self {
        Self { snapshot }
    }
}

impl Reader for ReadTxn {
    fn icn(&self) -> Icn {
        self.snapshot.icn
    }

    fn get(&self, item: ItemId, attribute: &Attribute) -> Option<Value> {
        self.snapshot
            .values(item)
            .and_then(|values| values.get(attribute))
            .cloned()
    }

    fn values(&self, item: ItemId) -> AttributeMap {
        self.snapshot.values(item).cloned().unwrap_or_default()
    }

    fn query(&self, query: &Query) -> Vec<ItemId> {
        self.snapshot.query(query)
    }
}

/// Outcome of a committed write transaction.
pub(crate) struct Commit {
    pub(crate) snapshot: Snapshot,
    pub(crate) changed: BTreeSet<ItemId>,
    pub(crate) finally: Vec<Box<dyn FnOnce(bool) + Send>>,
}

/// A write transaction with a pending-write overlay.
pub(crate) struct WriteTxn {
    base: Arc<Snapshot>,
    pending: BTreeMap<ItemId, AttributeMap>,
    last_item: u64,
    finally: Vec<Box<dyn FnOnce(bool) + Send>>,
}

impl WriteTxn {
    pub(crate) fn new(base: Arc<Snapshot>) -> Self {
        let last_item = base.last_item;
        Self {
            base,
            pending: BTreeMap::new(),
            last_item,
            finally: Vec::new(),
        }
    }

    fn values_mut(&mut self, item: ItemId) -> &mut AttributeMap {
        let base = &self.base;
        self.pending
            .entry(item)
            .or_insert_with(|| base.values(item).cloned().unwrap_or_default())
    }

    /// Drops pending writes and hands back the completion actions.
    pub(crate) fn rollback(self) -> Vec<Box<dyn FnOnce(bool) + Send>> {
        self.finally
    }

    pub(crate) fn into_commit(self) -> Commit {
        let mut snapshot = Snapshot::clone(&self.base);
        snapshot.icn = self.base.icn.next();
        snapshot.last_item = self.last_item;
        let mut changed = BTreeSet::new();
        for (item, values) in self.pending {
            if self.base.values(item) == Some(&values)
                || (values.is_empty() && self.base.values(item).is_none())
            {
                continue;
            }
            changed.insert(item);
            if values.is_empty() {
                snapshot.items.remove(&item);
            } else {
                snapshot.items.insert(item, Arc::new(values));
            }
        }
        Commit {
            snapshot,
            changed,
            finally: self.finally,
        }
    }
}

impl Reader for WriteTxn {
    fn icn(&self) -> Icn {
        self.base.icn.next()
    }

    fn get(&self, item: ItemId, attribute: &Attribute) -> Option<Value> {
        match self.pending.get(&item) {
            Some(values) => values.get(attribute).cloned(),
            None => self
                .base
                .values(item)
                .and_then(|values| values.get(attribute))
                .cloned(),
        }
    }

    fn values(&self, item: ItemId) -> AttributeMap {
        match self.pending.get(&item) {
            Some(values) => values.clone(),
            None => self.base.values(item).cloned().unwrap_or_default(),
        }
    }

    fn query(&self, query: &Query) -> Vec<ItemId> {
        let mut found: BTreeSet<ItemId> = self
            .base
            .query(query)
            .into_iter()
            .filter(|item| !self.pending.contains_key(item))
            .collect();
        for (item, values) in &self.pending {
            if !values.is_empty() && query.matches(values) {
                found.insert(*item);
            }
        }
        found.into_iter().collect()
    }
}

impl Writer for WriteTxn {
    fn set(&mut self, item: ItemId, attribute: &Attribute, value: Option<Value>) {
        if let Some(value) = &value {
            assert!(
                attribute.accepts(value),
                "value of kind {:?} written to attribute {} of kind {:?}",
                value.kind(),
                attribute,
                attribute.kind()
            );
        }
        self.values_mut(item).set(attribute, value);
    }

    fn create_item(&mut self) -> ItemId {
        self.last_item += 1;
        let item = ItemId::new(self.last_item);
        self.pending.insert(item, AttributeMap::new());
        item
    }

    fn clear_item(&mut self, item: ItemId) {
        self.pending.insert(item, AttributeMap::new());
    }

    fn finally_do(&mut self, action: Box<dyn FnOnce(bool) + Send>) {
        self.finally.push(action);
    }

    fn as_reader(&self) -> &dyn Reader {
        self
    }
}
