//! Attribute descriptors and attribute maps.

use crate::value::Value;
use std::cmp::Ordering;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Kind of value an attribute holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Boolean flag.
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// UTF-8 text.
    Text,
    /// Opaque bytes.
    Bytes,
    /// Reference to a single item.
    Ref,
    /// Ordered list of item references.
    RefList,
    /// Set of item references.
    RefSet,
    /// Nested attribute map (used by shadow branches).
    Map,
}

struct AttributeDef {
    name: Box<str>,
    kind: ValueKind,
    shadowable: bool,
    master: bool,
}

/// A typed, named slot on an item.
///
/// Attributes compare, order and hash by name only. Shadowable attributes
/// have independent values per branch; direct attributes live in TRUNK only.
#[derive(Clone)]
pub struct Attribute(Arc<AttributeDef>);

impl Attribute {
    fn build(name: impl Into<String>, kind: ValueKind, shadowable: bool, master: bool) -> Self {
        Self(Arc::new(AttributeDef {
            name: name.into().into_boxed_str(),
            kind,
            shadowable,
            master,
        }))
    }

    /// Creates a direct (TRUNK-only) attribute.
    pub fn direct(name: impl Into<String>, kind: ValueKind) -> Self {
        Self::build(name, kind, false, false)
    }

    /// Creates a shadowable attribute.
    pub fn shadowable(name: impl Into<String>, kind: ValueKind) -> Self {
        Self::build(name, kind, true, false)
    }

    /// Creates a master reference: the item holding it is a slave of the
    /// referenced item.
    pub fn master_ref(name: impl Into<String>) -> Self {
        Self::build(name, ValueKind::Ref, false, true)
    }

    /// Returns the attribute name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Returns the value kind.
    pub fn kind(&self) -> ValueKind {
        self.0.kind
    }

    /// Returns true if the attribute has per-branch values.
    pub fn is_shadowable(&self) -> bool {
        self.0.shadowable
    }

    /// Returns true if the attribute links a slave to its master.
    pub fn is_master_ref(&self) -> bool {
        self.0.master
    }

    /// Returns true if `value` has the kind this attribute holds.
    pub fn accepts(&self, value: &Value) -> bool {
        value.kind() == self.kind()
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for Attribute {}

impl PartialOrd for Attribute {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Attribute {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.name.cmp(&other.0.name)
    }
}

impl Hash for Attribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// Values of several attributes, ordered by attribute name.
///
/// Used for TRUNK snapshots and for the shadow branches, which are stored
/// as maps on the item itself. Empty reference collections are never
/// stored: setting one removes the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap(BTreeMap<Attribute, Value>);

impl AttributeMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, attribute: &Attribute, value: impl Into<Value>) -> Self {
        self.set(attribute, Some(value.into()));
        self
    }

    /// Returns the value of `attribute`.
    pub fn get(&self, attribute: &Attribute) -> Option<&Value> {
        self.0.get(attribute)
    }

    /// Sets or clears the value of `attribute`.
    pub fn set(&mut self, attribute: &Attribute, value: Option<Value>) {
        match value.and_then(Value::normalized) {
            Some(value) => {
                self.0.insert(attribute.clone(), value);
            }
            None => {
                self.0.remove(attribute);
            }
        }
    }

    /// Removes and returns the value of `attribute`.
    pub fn remove(&mut self, attribute: &Attribute) -> Option<Value> {
        self.0.remove(attribute)
    }

    /// Returns true if `attribute` has a value.
    pub fn contains(&self, attribute: &Attribute) -> bool {
        self.0.contains_key(attribute)
    }

    /// Iterates over the attributes that have values.
    pub fn keys(&self) -> impl Iterator<Item = &Attribute> {
        self.0.keys()
    }

    /// Iterates over entries in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, Attribute, Value> {
        self.0.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no attribute has a value.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy holding only shadowable attributes.
    #[must_use]
    pub fn shadowable_only(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(attribute, _)| attribute.is_shadowable())
                .map(|(a, v)| (a.clone(), v.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(Attribute, Value)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (Attribute, Value)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (attribute, value) in iter {
            map.set(&attribute, Some(value));
        }
        map
    }
}

impl<'a> IntoIterator for &'a AttributeMap {
    type Item = (&'a Attribute, &'a Value);
    type IntoIter = btree_map::Iter<'a, Attribute, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
