//! Attribute values.

use crate::attribute::{AttributeMap, ValueKind};
use crate::types::ItemId;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;

/// A value stored in an attribute slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Text.
    Text(String),
    /// Opaque bytes.
    Bytes(Bytes),
    /// Single item reference.
    Ref(ItemId),
    /// Ordered item references.
    RefList(Vec<ItemId>),
    /// Unordered item references.
    RefSet(BTreeSet<ItemId>),
    /// Nested attribute map.
    Map(AttributeMap),
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Ref(_) => ValueKind::Ref,
            Value::RefList(_) => ValueKind::RefList,
            Value::RefSet(_) => ValueKind::RefSet,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// Drops values that are equivalent to "no value": empty reference
    /// collections and empty byte strings.
    pub fn normalized(self) -> Option<Self> {
        match &self {
            Value::RefList(list) if list.is_empty() => None,
            Value::RefSet(set) if set.is_empty() => None,
            Value::Bytes(bytes) if bytes.is_empty() => None,
            _ => Some(self),
        }
    }

    /// Returns the boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the text, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a byte string.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the referenced item, if this is a single reference.
    pub fn as_item(&self) -> Option<ItemId> {
        match self {
            Value::Ref(item) => Some(*item),
            _ => None,
        }
    }

    /// Returns the nested map, if this is a map.
    pub fn as_map(&self) -> Option<&AttributeMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns every referenced item, for any reference kind.
    pub fn referenced_items(&self) -> Vec<ItemId> {
        match self {
            Value::Ref(item) => vec![*item],
            Value::RefList(list) => list.clone(),
            Value::RefSet(set) => set.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Returns true if this value references `item`.
    pub fn refers_to(&self, item: ItemId) -> bool {
        match self {
            Value::Ref(r) => *r == item,
            Value::RefList(list) => list.contains(&item),
            Value::RefSet(set) => set.contains(&item),
            _ => false,
        }
    }
}

/// Compares two optional values, treating empty collections as absent.
pub fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => match (a, b) {
            (Value::RefList(x), Value::RefList(y)) => x == y,
            _ => a == b || (is_empty(a) && is_empty(b)),
        },
        (Some(v), None) | (None, Some(v)) => is_empty(v),
        (None, None) => true,
    }
}

fn is_empty(value: &Value) -> bool {
    value.clone().normalized().is_none()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Ref(item) => write!(f, "{item}"),
            Value::RefList(list) => f.debug_list().entries(list).finish(),
            Value::RefSet(set) => f.debug_set().entries(set).finish(),
            Value::Map(map) => {
                let mut m = f.debug_map();
                for (attribute, value) in map {
                    m.entry(&attribute.name(), &format_args!("{value}"));
                }
                m.finish()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<ItemId> for Value {
    fn from(value: ItemId) -> Self {
        Value::Ref(value)
    }
}

impl From<Vec<ItemId>> for Value {
    fn from(value: Vec<ItemId>) -> Self {
        Value::RefList(value)
    }
}

impl From<BTreeSet<ItemId>> for Value {
    fn from(value: BTreeSet<ItemId>) -> Self {
        Value::RefSet(value)
    }
}

impl From<AttributeMap> for Value {
    fn from(value: AttributeMap) -> Self {
        Value::Map(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_collections_equal_absent() {
        assert!(values_equal(Some(&Value::RefList(Vec::new())), None));
        assert!(values_equal(
            Some(&Value::RefSet(BTreeSet::new())),
            Some(&Value::RefList(Vec::new()))
        ));
        assert!(!values_equal(Some(&Value::from("")), None));
    }

    #[test]
    fn list_order_matters() {
        let a = Value::from(vec![ItemId::new(1), ItemId::new(2)]);
        let b = Value::from(vec![ItemId::new(2), ItemId::new(1)]);
        assert!(!values_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn refers_to_any_reference_kind() {
        let item = ItemId::new(3);
        assert!(Value::from(item).refers_to(item));
        assert!(Value::from(vec![ItemId::new(1), item]).refers_to(item));
        assert!(!Value::from(7).refers_to(item));
    }

    #[test]
    fn empty_map_is_a_value() {
        assert!(Value::Map(AttributeMap::new()).normalized().is_some());
    }
}
