//! Bulk value loaders.
//!
//! A loader turns a batch of items into one value per item, in the same
//! order. Loaders are pure functions of the read transaction. A value that
//! depends on another item than its own (a user name shown for an
//! assignee) is registered through [`LoadContext::depends_on`] and reloaded
//! when that item changes.

use itemsync_store::{Attribute, ItemId, Reader, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Handle of a loader registered with a [`crate::DbImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoaderKey(pub(crate) usize);

impl fmt::Display for LoaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loader:{}", self.0)
    }
}

/// Collects the extra dependencies of loaded values.
#[derive(Debug, Default)]
pub struct LoadContext {
    dependencies: BTreeMap<ItemId, BTreeSet<ItemId>>,
}

impl LoadContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The value loaded for `item` must be reloaded when `dependency`
    /// changes.
    pub fn depends_on(&mut self, item: ItemId, dependency: ItemId) {
        if item != dependency {
            self.dependencies.entry(item).or_default().insert(dependency);
        }
    }

    pub(crate) fn into_dependencies(self) -> BTreeMap<ItemId, BTreeSet<ItemId>> {
        self.dependencies
    }
}

/// Loads values of many items at once.
pub trait DataLoader: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Returns one value per item, in the order of `items`.
    fn load(
        &self,
        reader: &dyn Reader,
        items: &[ItemId],
        context: &mut LoadContext,
    ) -> Vec<Option<Value>>;
}

/// Loads one attribute of the item itself.
#[derive(Debug, Clone)]
pub struct AttributeLoader {
    attribute: Attribute,
}

impl AttributeLoader {
    /// Creates a loader for `attribute`.
    pub fn new(attribute: &Attribute) -> Self {
        Self {
            attribute: attribute.clone(),
        }
    }
}

impl DataLoader for AttributeLoader {
    fn name(&self) -> &str {
        self.attribute.name()
    }

    fn load(
        &self,
        reader: &dyn Reader,
        items: &[ItemId],
        _context: &mut LoadContext,
    ) -> Vec<Option<Value>> {
        items
            .iter()
            .map(|item| reader.get(*item, &self.attribute))
            .collect()
    }
}

/// Loads an attribute of the item a reference attribute points to.
#[derive(Debug, Clone)]
pub struct ReferenceLoader {
    name: String,
    reference: Attribute,
    target: Attribute,
}

impl ReferenceLoader {
    /// Loads `target` of the item referenced by `reference`.
    pub fn new(reference: &Attribute, target: &Attribute) -> Self {
        Self {
            name: format!("{}.{}", reference.name(), target.name()),
            reference: reference.clone(),
            target: target.clone(),
        }
    }
}

impl DataLoader for ReferenceLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(
        &self,
        reader: &dyn Reader,
        items: &[ItemId],
        context: &mut LoadContext,
    ) -> Vec<Option<Value>> {
        items
            .iter()
            .map(|item| {
                let referenced = reader
                    .get(*item, &self.reference)
                    .and_then(|value| value.as_item())?;
                context.depends_on(*item, referenced);
                reader.get(referenced, &self.target)
            })
            .collect()
    }
}

/// Loader from a closure.
pub struct FnLoader<F> {
    name: String,
    load: F,
}

impl<F> FnLoader<F>
where
    F: Fn(&dyn Reader, ItemId, &mut LoadContext) -> Option<Value> + Send + Sync,
{
    /// Loads each item with `load`.
    pub fn new(name: impl Into<String>, load: F) -> Self {
        Self {
            name: name.into(),
            load,
        }
    }
}

impl<F> DataLoader for FnLoader<F>
where
    F: Fn(&dyn Reader, ItemId, &mut LoadContext) -> Option<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn load(
        &self,
        reader: &dyn Reader,
        items: &[ItemId],
        context: &mut LoadContext,
    ) -> Vec<Option<Value>> {
        items
            .iter()
            .map(|item| (self.load)(reader, *item, context))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemsync_store::{Store, ValueKind};

    #[test]
    fn reference_loader_follows_reference() {
        let store = Store::new();
        let assignee = Attribute::shadowable("issue.assignee", ValueKind::Ref);
        let name = Attribute::shadowable("user.name", ValueKind::Text);
        let (issue, user) = store
            .write_now(|w| {
                let user = w.create_item();
                w.set(user, &name, Some(Value::from("ada")));
                let issue = w.create_item();
                w.set(issue, &assignee, Some(Value::Ref(user)));
                Ok((issue, user))
            })
            .unwrap();
        let orphan = ItemId::new(99);

        let loader = ReferenceLoader::new(&assignee, &name);
        let mut context = LoadContext::new();
        let values = store
            .read_now(|r| Ok(loader.load(r, &[issue, orphan], &mut context)))
            .unwrap();
        assert_eq!(values, vec![Some(Value::from("ada")), None]);
        assert_eq!(
            context.into_dependencies(),
            BTreeMap::from([(issue, BTreeSet::from([user]))])
        );
        assert_eq!(loader.name(), "issue.assignee.user.name");
    }

    #[test]
    fn self_dependency_is_ignored() {
        let mut context = LoadContext::new();
        context.depends_on(ItemId::new(1), ItemId::new(1));
        assert!(context.into_dependencies().is_empty());
    }

    #[test]
    fn fn_loader_keeps_order() {
        let store = Store::new();
        let loader = FnLoader::new("id", |_: &dyn Reader, item: ItemId, _: &mut LoadContext| {
            Some(Value::Int(item.as_u64() as i64))
        });
        let items = [ItemId::new(3), ItemId::new(1), ItemId::new(2)];
        let values = store
            .read_now(|r| Ok(loader.load(r, &items, &mut LoadContext::new())))
            .unwrap();
        assert_eq!(
            values,
            vec![Some(Value::Int(3)), Some(Value::Int(1)), Some(Value::Int(2))]
        );
    }
}
