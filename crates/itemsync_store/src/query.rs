//! Boolean predicates over item attributes.

use crate::attribute::{Attribute, AttributeMap};
use crate::types::ItemId;
use crate::value::{values_equal, Value};

/// A boolean predicate evaluated against the TRUNK values of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Matches every item.
    All,
    /// Attribute has a value.
    Has(Attribute),
    /// Attribute equals the given value.
    Equals(Attribute, Value),
    /// Attribute is a reference (single, list or set) that includes the item.
    RefersTo(Attribute, ItemId),
    /// Any master-reference attribute points at the item.
    SlaveOf(ItemId),
    /// All sub-queries match.
    And(Vec<Query>),
    /// At least one sub-query matches.
    Or(Vec<Query>),
    /// Sub-query does not match.
    Not(Box<Query>),
}

impl Query {
    /// Attribute has a value.
    pub fn has(attribute: &Attribute) -> Self {
        Query::Has(attribute.clone())
    }

    /// Attribute equals `value`.
    pub fn equals(attribute: &Attribute, value: impl Into<Value>) -> Self {
        Query::Equals(attribute.clone(), value.into())
    }

    /// Attribute references `item`.
    pub fn refers_to(attribute: &Attribute, item: ItemId) -> Self {
        Query::RefersTo(attribute.clone(), item)
    }

    /// Conjunction with another query.
    #[must_use]
    pub fn and(self, other: Query) -> Self {
        match self {
            Query::All => other,
            Query::And(mut parts) => {
                parts.push(other);
                Query::And(parts)
            }
            this => Query::And(vec![this, other]),
        }
    }

    /// Disjunction with another query.
    #[must_use]
    pub fn or(self, other: Query) -> Self {
        match self {
            Query::Or(mut parts) => {
                parts.push(other);
                Query::Or(parts)
            }
            this => Query::Or(vec![this, other]),
        }
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Query::Not(inner) => *inner,
            this => Query::Not(Box::new(this)),
        }
    }

    /// Evaluates the predicate against an item's values.
    pub fn matches(&self, values: &AttributeMap) -> bool {
        match self {
            Query::All => true,
            Query::Has(attribute) => values.contains(attribute),
            Query::Equals(attribute, value) => values_equal(values.get(attribute), Some(value)),
            Query::RefersTo(attribute, item) => values
                .get(attribute)
                .is_some_and(|value| value.refers_to(*item)),
            Query::SlaveOf(master) => values
                .iter()
                .any(|(attribute, value)| attribute.is_master_ref() && value.refers_to(*master)),
            Query::And(parts) => parts.iter().all(|q| q.matches(values)),
            Query::Or(parts) => parts.iter().any(|q| q.matches(values)),
            Query::Not(inner) => !inner.matches(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::ValueKind;

    fn attrs() -> (Attribute, Attribute) {
        (
            Attribute::shadowable("test.text", ValueKind::Text),
            Attribute::master_ref("test.master"),
        )
    }

    #[test]
    fn combinators_evaluate() {
        let (text, master) = attrs();
        let owner = ItemId::new(10);
        let values = AttributeMap::new().with(&text, "abc").with(&master, owner);

        assert!(Query::All.matches(&values));
        assert!(Query::has(&text).and(Query::refers_to(&master, owner)).matches(&values));
        assert!(!Query::equals(&text, "xyz").matches(&values));
        assert!(Query::equals(&text, "xyz").or(Query::has(&master)).matches(&values));
        assert!(!Query::has(&text).negate().matches(&values));
        assert!(Query::SlaveOf(owner).matches(&values));
        assert!(!Query::SlaveOf(ItemId::new(11)).matches(&values));
    }

    #[test]
    fn and_with_all_is_identity() {
        let (text, _) = attrs();
        assert_eq!(Query::All.and(Query::has(&text)), Query::has(&text));
        assert_eq!(Query::has(&text).negate().negate(), Query::has(&text));
    }
}
