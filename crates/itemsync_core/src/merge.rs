//! Auto-merge engine.
//!
//! A merge compares the local changes (TRUNK against the state they were
//! made on) with the server changes (newest server state against the same
//! state). Attributes changed on both sides to different values are
//! unresolved. Merge logic chosen by a [`MergeSelector`] may resolve them;
//! a resolution counts only if it covers every unresolved attribute.
//! Otherwise the server state is parked in CONFLICT and TRUNK is kept.

use crate::branch::trunk_shadowables;
use crate::diff::ItemDiff;
use crate::history;
use crate::schema::{
    self, BASE, CONFLICT, DONE_UPLOAD, DONE_UPLOAD_HISTORY, DOWNLOAD, HISTORY, INVISIBLE,
    UPLOAD_ATTEMPT,
};
use crate::state::SyncState;
use itemsync_store::{
    values_equal, Aborted, Attribute, AttributeMap, Icn, ItemId, Reader, Value, Writer,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Merge logic for one kind of item.
pub trait ItemAutoMerge: Send + Sync {
    /// Widens the change sets before unresolved attributes are computed,
    /// e.g. to make two attributes merge together.
    fn pre_process(&self, _local: &mut ItemDiff, _server: &mut ItemDiff) {}

    /// Resolves unresolved attributes.
    fn resolve(&self, data: &mut AutoMergeData);
}

/// Picks merge logic per item.
pub trait MergeSelector: Send + Sync {
    /// Merge logic for `item`, `None` for no automatic resolution.
    fn operations(&self, reader: &dyn Reader, item: ItemId) -> Option<Arc<dyn ItemAutoMerge>>;
}

/// Never resolves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAutoMerge;

impl MergeSelector for NoAutoMerge {
    fn operations(&self, _reader: &dyn Reader, _item: ItemId) -> Option<Arc<dyn ItemAutoMerge>> {
        None
    }
}

/// Uses the same merge logic for every item.
#[derive(Clone)]
pub struct UniformMergeSelector(pub Arc<dyn ItemAutoMerge>);

impl MergeSelector for UniformMergeSelector {
    fn operations(&self, _reader: &dyn Reader, _item: ItemId) -> Option<Arc<dyn ItemAutoMerge>> {
        Some(Arc::clone(&self.0))
    }
}

/// How a [`PolicyAutoMerge`] resolves one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergePolicy {
    /// Take the server value.
    ServerWins,
    /// Keep the local value.
    LocalWins,
    /// Leave it to the user.
    Manual,
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergePolicy::ServerWins => "server-wins",
            MergePolicy::LocalWins => "local-wins",
            MergePolicy::Manual => "manual",
        })
    }
}

/// Resolves attributes by a fixed per-attribute policy.
#[derive(Debug, Clone)]
pub struct PolicyAutoMerge {
    default: MergePolicy,
    policies: BTreeMap<Attribute, MergePolicy>,
}

impl PolicyAutoMerge {
    /// Creates a merge applying `default` to attributes without a policy.
    pub fn new(default: MergePolicy) -> Self {
        Self {
            default,
            policies: BTreeMap::new(),
        }
    }

    /// Sets the policy of one attribute.
    #[must_use]
    pub fn with(mut self, attribute: &Attribute, policy: MergePolicy) -> Self {
        self.policies.insert(attribute.clone(), policy);
        self
    }

    /// Policy applied to `attribute`.
    pub fn policy(&self, attribute: &Attribute) -> MergePolicy {
        self.policies.get(attribute).copied().unwrap_or(self.default)
    }
}

impl ItemAutoMerge for PolicyAutoMerge {
    fn resolve(&self, data: &mut AutoMergeData) {
        let unresolved: Vec<Attribute> = data.unresolved().iter().cloned().collect();
        for attribute in unresolved {
            match self.policy(&attribute) {
                MergePolicy::ServerWins => data.discard_edit(&[attribute]),
                MergePolicy::LocalWins => data.resolve_to_local(&[attribute]),
                MergePolicy::Manual => {}
            }
        }
    }
}

/// Input and output of one [`ItemAutoMerge::resolve`] call.
#[derive(Debug)]
pub struct AutoMergeData {
    item: ItemId,
    local: ItemDiff,
    server: ItemDiff,
    unresolved: BTreeSet<Attribute>,
    resolutions: BTreeMap<Attribute, Option<Value>>,
    removed_history: BTreeSet<i32>,
}

impl AutoMergeData {
    fn new(item: ItemId, local: ItemDiff, server: ItemDiff, unresolved: BTreeSet<Attribute>) -> Self {
        Self {
            item,
            local,
            server,
            unresolved,
            resolutions: BTreeMap::new(),
            removed_history: BTreeSet::new(),
        }
    }

    /// Item being merged.
    pub fn item(&self) -> ItemId {
        self.item
    }

    /// Local changes.
    pub fn local(&self) -> &ItemDiff {
        &self.local
    }

    /// Server changes.
    pub fn server(&self) -> &ItemDiff {
        &self.server
    }

    /// Attributes changed on both sides to different values.
    pub fn unresolved(&self) -> &BTreeSet<Attribute> {
        &self.unresolved
    }

    /// Local value of an attribute.
    pub fn local_value(&self, attribute: &Attribute) -> Option<&Value> {
        self.local.new_value(attribute)
    }

    /// Server value of an attribute.
    pub fn server_value(&self, attribute: &Attribute) -> Option<&Value> {
        self.server.new_value(attribute)
    }

    /// Value both sides started from.
    pub fn base_value(&self, attribute: &Attribute) -> Option<&Value> {
        self.local.old_value(attribute)
    }

    /// Sets the merged value of an attribute.
    pub fn set_resolution(&mut self, attribute: &Attribute, value: Option<Value>) {
        self.resolutions.insert(attribute.clone(), value);
    }

    /// Resolves to the server values.
    pub fn discard_edit(&mut self, attributes: &[Attribute]) {
        for attribute in attributes {
            let value = self.server_value(attribute).cloned();
            self.set_resolution(attribute, value);
        }
    }

    /// Resolves to the local values.
    pub fn resolve_to_local(&mut self, attributes: &[Attribute]) {
        for attribute in attributes {
            let value = self.local_value(attribute).cloned();
            self.set_resolution(attribute, value);
        }
    }

    /// Resolves a delete-versus-change collision in favour of the deletion.
    pub fn resolve_delete(&mut self) {
        self.set_resolution(&INVISIBLE, Some(Value::Bool(true)));
    }

    /// Drops a local history record superseded by the merge outcome.
    pub fn remove_history_record(&mut self, record_id: i32) {
        if self.local.remove_history_record(record_id) {
            self.removed_history.insert(record_id);
        }
    }

    /// Returns true if every unresolved attribute has a resolution.
    pub fn is_conflict_resolved(&self) -> bool {
        self.unresolved
            .iter()
            .all(|attribute| self.resolutions.contains_key(attribute))
    }

    /// Returns true if the resolution throws the local edit away: every
    /// local change is resolved to the server value and no pending history
    /// is left.
    pub fn is_discard_edit(&self) -> bool {
        !self.local.has_history()
            && self
                .local
                .changed()
                .iter()
                .all(|attribute| self.resolutions.contains_key(attribute))
            && self
                .resolutions
                .iter()
                .all(|(attribute, value)| values_equal(value.as_ref(), self.server_value(attribute)))
    }

    fn resolution(&self, attribute: &Attribute) -> Option<&Option<Value>> {
        self.resolutions.get(attribute)
    }
}

/// Items merged by one transaction and their resulting states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeEvent {
    /// ICN of the merging transaction.
    pub icn: Icn,
    /// Merged items.
    pub items: BTreeMap<ItemId, SyncState>,
}

/// Receives [`MergeEvent`]s.
pub trait MergeListener: Send + Sync {
    /// Called after a merging transaction committed.
    fn on_items_merged(&self, event: &MergeEvent);
}

impl<F> MergeListener for F
where
    F: Fn(&MergeEvent) + Send + Sync,
{
    fn on_items_merged(&self, event: &MergeEvent) {
        self(event);
    }
}

/// Merges the server state of `item` into TRUNK and returns the resulting
/// state.
pub(crate) fn merge_item(
    writer: &mut dyn Writer,
    item: ItemId,
    selector: &dyn MergeSelector,
) -> Result<SyncState, Aborted> {
    let reader = writer.as_reader();
    let base = reader.get_map(item, &BASE);
    let done = reader.get_map(item, &DONE_UPLOAD);
    let new_server = reader
        .get_map(item, &DOWNLOAD)
        .or_else(|| done.clone())
        .or_else(|| reader.get_map(item, &CONFLICT));
    let local_base = done.or(base);

    match (new_server, local_base) {
        (None, None) => {}
        (None, Some(local_base)) => settle_local(writer, item, &local_base),
        (Some(server), None) => {
            copy_to_trunk(writer, item, &server);
            clear_server_shadows(writer, item)?;
        }
        (Some(server), Some(local_base)) => merge_both(writer, item, selector, server, local_base)?,
    }
    Ok(SyncState::of(writer.as_reader(), item))
}

/// No server news: forget BASE once nothing is left to upload.
fn settle_local(writer: &mut dyn Writer, item: ItemId, local_base: &AttributeMap) {
    let reader = writer.as_reader();
    let local = ItemDiff::local(reader, item, local_base.clone(), false);
    let corpse = schema::is_invisible(local_base) && reader.get_flag(item, &INVISIBLE);
    if corpse {
        // Never reached the server; nothing to upload.
        writer.set(item, &HISTORY, None);
    }
    if corpse || !local.has_changes() {
        writer.set(item, &BASE, None);
        writer.set(item, &UPLOAD_ATTEMPT, None);
    }
}

fn merge_both(
    writer: &mut dyn Writer,
    item: ItemId,
    selector: &dyn MergeSelector,
    server: AttributeMap,
    local_base: AttributeMap,
) -> Result<(), Aborted> {
    let reader = writer.as_reader();
    let trunk = trunk_shadowables(reader, item);
    let mut local = ItemDiff::local(reader, item, local_base.clone(), false);
    let mut server_diff = ItemDiff::between(item, local_base.clone(), server.clone());
    let operations = selector.operations(reader, item);
    if let Some(operations) = &operations {
        operations.pre_process(&mut local, &mut server_diff);
    }
    let unresolved = unresolved_attributes(&local, &server_diff, &local_base);
    let mut data = AutoMergeData::new(item, local, server_diff, unresolved);
    if !data.unresolved().is_empty() {
        if let Some(operations) = &operations {
            operations.resolve(&mut data);
        }
    }

    if !data.is_conflict_resolved() {
        info!(item = %item, unresolved = data.unresolved().len(), "merge conflict");
        writer.set(item, &CONFLICT, Some(Value::Map(server)));
        writer.set(item, &BASE, Some(Value::Map(local_base)));
        writer.set(item, &DOWNLOAD, None);
        if writer.as_reader().get(item, &DONE_UPLOAD).is_some() {
            history::drop_confirmed_history(writer, item)?;
            writer.set(item, &DONE_UPLOAD, None);
        }
        return Ok(());
    }

    if data.is_discard_edit() {
        debug!(item = %item, "local edit discarded");
        copy_to_trunk(writer, item, &server);
        clear_server_shadows(writer, item)?;
        writer.set(item, &HISTORY, None);
        return Ok(());
    }

    let attributes: BTreeSet<Attribute> = trunk
        .keys()
        .chain(server.keys())
        .chain(local_base.keys())
        .cloned()
        .collect();
    let mut merged = AttributeMap::new();
    for attribute in &attributes {
        let value = match data.resolution(attribute) {
            Some(resolution) => resolution.clone(),
            None if data.local().is_changed(attribute) => trunk.get(attribute).cloned(),
            None => server.get(attribute).cloned(),
        };
        merged.set(attribute, value);
    }
    copy_to_trunk(writer, item, &merged);

    history::drop_confirmed_history(writer, item)?;
    let removed: Vec<i32> = data.removed_history.iter().copied().collect();
    history::remove_history_records(writer, item, &removed)?;

    let pending = history::pending_history(writer.as_reader(), item);
    let local_left = attributes
        .iter()
        .any(|attribute| !values_equal(merged.get(attribute), server.get(attribute)));
    if local_left || !pending.is_empty() {
        writer.set(item, &BASE, Some(Value::Map(server)));
    } else {
        writer.set(item, &BASE, None);
        writer.set(item, &UPLOAD_ATTEMPT, None);
    }
    writer.set(item, &CONFLICT, None);
    writer.set(item, &DOWNLOAD, None);
    writer.set(item, &DONE_UPLOAD, None);
    debug!(item = %item, local_left, "merged");
    Ok(())
}

/// Attributes changed on both sides to different values, plus the
/// deletion flag when one side deleted the item and the other changed it.
fn unresolved_attributes(
    local: &ItemDiff,
    server: &ItemDiff,
    local_base: &AttributeMap,
) -> BTreeSet<Attribute> {
    let mut unresolved: BTreeSet<Attribute> = local
        .changed()
        .intersection(server.changed())
        .filter(|attribute| !values_equal(local.new_value(attribute), server.new_value(attribute)))
        .cloned()
        .collect();
    let was_deleted = schema::is_invisible(local_base);
    let local_deleted = !was_deleted && schema::is_invisible(local.newer());
    let server_deleted = !was_deleted && schema::is_invisible(server.newer());
    let changed_besides_deletion =
        |diff: &ItemDiff| diff.changed().iter().any(|attribute| *attribute != *INVISIBLE);
    if local_deleted && !server_deleted && changed_besides_deletion(server) {
        unresolved.insert(INVISIBLE.clone());
    }
    if server_deleted && !local_deleted && (changed_besides_deletion(local) || local.has_history())
    {
        unresolved.insert(INVISIBLE.clone());
    }
    unresolved
}

/// Makes the shadowable TRUNK values equal to `values`.
pub(crate) fn copy_to_trunk(writer: &mut dyn Writer, item: ItemId, values: &AttributeMap) {
    let current = trunk_shadowables(writer.as_reader(), item);
    for attribute in current.keys() {
        if !values.contains(attribute) {
            writer.set(item, attribute, None);
        }
    }
    for (attribute, value) in values {
        writer.set(item, attribute, Some(value.clone()));
    }
}

/// Drops every server shadow and upload result once TRUNK holds the server
/// state.
pub(crate) fn clear_server_shadows(writer: &mut dyn Writer, item: ItemId) -> Result<(), Aborted> {
    if writer.as_reader().get(item, &DONE_UPLOAD_HISTORY).is_some() {
        history::drop_confirmed_history(writer, item)?;
    }
    for attribute in [&*BASE, &*CONFLICT, &*DOWNLOAD, &*DONE_UPLOAD, &*UPLOAD_ATTEMPT] {
        writer.set(item, attribute, None);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemsync_store::{Store, ValueKind};

    fn a() -> Attribute {
        Attribute::shadowable("test.a", ValueKind::Text)
    }

    fn b() -> Attribute {
        Attribute::shadowable("test.b", ValueKind::Text)
    }

    /// Item with BASE {a: base, b: base}, TRUNK as given, DOWNLOAD as given.
    fn seeded(store: &Store, trunk: AttributeMap, download: AttributeMap) -> ItemId {
        store
            .write_now(move |w| {
                let item = w.create_item();
                w.set(item, &schema::EXISTING, Some(Value::Bool(true)));
                let base = AttributeMap::new().with(&a(), "base").with(&b(), "base");
                w.set(item, &BASE, Some(base.into()));
                copy_to_trunk(w, item, &trunk);
                w.set(item, &DOWNLOAD, Some(download.into()));
                Ok(item)
            })
            .unwrap()
    }

    fn merge(store: &Store, item: ItemId, selector: &dyn MergeSelector) -> SyncState {
        store.write_now(|w| merge_item(w, item, selector)).unwrap()
    }

    fn trunk(store: &Store, item: ItemId, attribute: &Attribute) -> Option<Value> {
        store.read_now(|r| Ok(r.get(item, attribute))).unwrap()
    }

    #[test]
    fn disjoint_changes_merge() {
        let store = Store::new();
        let item = seeded(
            &store,
            AttributeMap::new().with(&a(), "local").with(&b(), "base"),
            AttributeMap::new().with(&a(), "base").with(&b(), "server"),
        );
        assert_eq!(merge(&store, item, &NoAutoMerge), SyncState::Edited);
        assert_eq!(trunk(&store, item, &a()), Some(Value::from("local")));
        assert_eq!(trunk(&store, item, &b()), Some(Value::from("server")));
        let base = store.read_now(|r| Ok(r.get_map(item, &BASE))).unwrap().unwrap();
        assert_eq!(base.get(&b()), Some(&Value::from("server")));
        assert!(trunk(&store, item, &DOWNLOAD).is_none());
    }

    #[test]
    fn same_change_on_both_sides_is_not_a_conflict() {
        let store = Store::new();
        let both = AttributeMap::new().with(&a(), "same").with(&b(), "base");
        let item = seeded(&store, both.clone(), both);
        assert_eq!(merge(&store, item, &NoAutoMerge), SyncState::Sync);
        assert!(trunk(&store, item, &BASE).is_none());
    }

    #[test]
    fn colliding_change_parks_conflict() {
        let store = Store::new();
        let item = seeded(
            &store,
            AttributeMap::new().with(&a(), "local").with(&b(), "base"),
            AttributeMap::new().with(&a(), "server").with(&b(), "base"),
        );
        assert_eq!(merge(&store, item, &NoAutoMerge), SyncState::Conflict);
        assert_eq!(trunk(&store, item, &a()), Some(Value::from("local")));
        let conflict = store.read_now(|r| Ok(r.get_map(item, &CONFLICT))).unwrap().unwrap();
        assert_eq!(conflict.get(&a()), Some(&Value::from("server")));

        // Re-merging the parked state with server-wins settles it.
        let selector = UniformMergeSelector(Arc::new(PolicyAutoMerge::new(MergePolicy::ServerWins)));
        assert_eq!(merge(&store, item, &selector), SyncState::Sync);
        assert_eq!(trunk(&store, item, &a()), Some(Value::from("server")));
        assert!(trunk(&store, item, &CONFLICT).is_none());
    }

    #[test]
    fn local_wins_keeps_edit_on_new_base() {
        let store = Store::new();
        let item = seeded(
            &store,
            AttributeMap::new().with(&a(), "local").with(&b(), "base"),
            AttributeMap::new().with(&a(), "server").with(&b(), "base"),
        );
        let selector = UniformMergeSelector(Arc::new(
            PolicyAutoMerge::new(MergePolicy::Manual).with(&a(), MergePolicy::LocalWins),
        ));
        assert_eq!(merge(&store, item, &selector), SyncState::Edited);
        assert_eq!(trunk(&store, item, &a()), Some(Value::from("local")));
    }

    struct HalfResolver;

    impl ItemAutoMerge for HalfResolver {
        fn resolve(&self, data: &mut AutoMergeData) {
            if let Some(first) = data.unresolved().iter().next().cloned() {
                data.set_resolution(&first, Some(Value::from("merged")));
            }
            assert!(!data.is_conflict_resolved());
        }
    }

    #[test]
    fn partial_resolution_is_discarded() {
        let store = Store::new();
        let item = seeded(
            &store,
            AttributeMap::new().with(&a(), "la").with(&b(), "lb"),
            AttributeMap::new().with(&a(), "sa").with(&b(), "sb"),
        );
        let selector = UniformMergeSelector(Arc::new(HalfResolver));
        assert_eq!(merge(&store, item, &selector), SyncState::Conflict);
        assert_eq!(trunk(&store, item, &a()), Some(Value::from("la")));
        assert_eq!(trunk(&store, item, &b()), Some(Value::from("lb")));
    }

    /// Makes `a` and `b` merge together.
    struct Coupled;

    impl ItemAutoMerge for Coupled {
        fn pre_process(&self, local: &mut ItemDiff, server: &mut ItemDiff) {
            for diff in [local, server] {
                if diff.is_changed(&a()) || diff.is_changed(&b()) {
                    diff.add_change(&a());
                    diff.add_change(&b());
                }
            }
        }

        fn resolve(&self, _data: &mut AutoMergeData) {}
    }

    #[test]
    fn coupled_attributes_conflict_together() {
        let store = Store::new();
        let local = AttributeMap::new().with(&a(), "local").with(&b(), "base");
        let server = AttributeMap::new().with(&a(), "base").with(&b(), "server");

        let plain = seeded(&store, local.clone(), server.clone());
        assert_eq!(merge(&store, plain, &NoAutoMerge), SyncState::Edited);

        let coupled = seeded(&store, local, server);
        let selector = UniformMergeSelector(Arc::new(Coupled));
        assert_eq!(merge(&store, coupled, &selector), SyncState::Conflict);
        assert_eq!(trunk(&store, coupled, &a()), Some(Value::from("local")));
        assert_eq!(trunk(&store, coupled, &b()), Some(Value::from("base")));
        let conflict = store.read_now(|r| Ok(r.get_map(coupled, &CONFLICT))).unwrap().unwrap();
        assert_eq!(conflict.get(&b()), Some(&Value::from("server")));
    }

    /// Takes the server side and drops every local history record.
    struct Discard;

    impl ItemAutoMerge for Discard {
        fn resolve(&self, data: &mut AutoMergeData) {
            let unresolved: Vec<Attribute> = data.unresolved().iter().cloned().collect();
            data.discard_edit(&unresolved);
            let ids: Vec<i32> = data.local().history().iter().map(|r| r.record_id()).collect();
            for id in ids {
                data.remove_history_record(id);
            }
        }
    }

    #[test]
    fn discard_drops_redundant_history() {
        let store = Store::new();
        let item = seeded(
            &store,
            AttributeMap::new().with(&a(), "local").with(&b(), "base"),
            AttributeMap::new().with(&a(), "server").with(&b(), "base"),
        );
        store
            .write_now(|w| history::append_history(w, item, 1, bytes::Bytes::from_static(b"set a")))
            .unwrap();

        let selector = UniformMergeSelector(Arc::new(Discard));
        assert_eq!(merge(&store, item, &selector), SyncState::Sync);
        assert_eq!(trunk(&store, item, &a()), Some(Value::from("server")));
        store
            .read_now(|r| {
                assert!(history::pending_history(r, item).is_empty());
                assert!(r.get(item, &HISTORY).is_none());
                assert!(r.get(item, &BASE).is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn discarding_one_attribute_keeps_other_edits() {
        let store = Store::new();
        let item = seeded(
            &store,
            AttributeMap::new().with(&a(), "local").with(&b(), "local"),
            AttributeMap::new().with(&a(), "server").with(&b(), "base"),
        );
        let selector = UniformMergeSelector(Arc::new(Discard));
        assert_eq!(merge(&store, item, &selector), SyncState::Edited);
        assert_eq!(trunk(&store, item, &a()), Some(Value::from("server")));
        assert_eq!(trunk(&store, item, &b()), Some(Value::from("local")));
    }

    #[test]
    fn server_delete_against_local_edit_is_modified_corpse() {
        let store = Store::new();
        let item = seeded(
            &store,
            AttributeMap::new().with(&a(), "local").with(&b(), "base"),
            AttributeMap::new()
                .with(&a(), "base")
                .with(&b(), "base")
                .with(&INVISIBLE, true),
        );
        assert_eq!(merge(&store, item, &NoAutoMerge), SyncState::ModifiedCorpse);
    }

    #[test]
    fn local_delete_against_server_edit_is_delete_modified() {
        let store = Store::new();
        let item = seeded(
            &store,
            AttributeMap::new()
                .with(&a(), "base")
                .with(&b(), "base")
                .with(&INVISIBLE, true),
            AttributeMap::new().with(&a(), "server").with(&b(), "base"),
        );
        assert_eq!(merge(&store, item, &NoAutoMerge), SyncState::DeleteModified);

        struct AcceptDelete;
        impl ItemAutoMerge for AcceptDelete {
            fn resolve(&self, data: &mut AutoMergeData) {
                data.resolve_delete();
            }
        }
        let selector = UniformMergeSelector(Arc::new(AcceptDelete));
        assert_eq!(merge(&store, item, &selector), SyncState::LocalDelete);
    }

    #[test]
    fn unedited_item_takes_server_state() {
        let store = Store::new();
        let item = store
            .write_now(|w| {
                let item = w.create_item();
                w.set(item, &a(), Some(Value::from("old")));
                w.set(item, &b(), Some(Value::from("gone")));
                w.set(item, &DOWNLOAD, Some(AttributeMap::new().with(&a(), "new").into()));
                Ok(item)
            })
            .unwrap();
        assert_eq!(merge(&store, item, &NoAutoMerge), SyncState::Sync);
        assert_eq!(trunk(&store, item, &a()), Some(Value::from("new")));
        assert_eq!(trunk(&store, item, &b()), None);
        assert!(trunk(&store, item, &DOWNLOAD).is_none());
    }

    #[test]
    fn reverted_edit_clears_base() {
        let store = Store::new();
        let item = store
            .write_now(|w| {
                let item = w.create_item();
                w.set(item, &a(), Some(Value::from("same")));
                w.set(item, &BASE, Some(AttributeMap::new().with(&a(), "same").into()));
                Ok(item)
            })
            .unwrap();
        assert_eq!(merge(&store, item, &NoAutoMerge), SyncState::Sync);
        assert!(trunk(&store, item, &BASE).is_none());
    }
}
