//! Sync state of an item.
//!
//! The state is never stored. It is derived from the TRUNK deletion flag and
//! from which shadow branches exist, so it always agrees with the data.

use crate::schema::{self, BASE, CONFLICT, INVISIBLE};
use itemsync_store::{ItemId, Reader};
use std::fmt;

/// Synchronization state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No local changes.
    Sync,
    /// Created locally, never uploaded.
    New,
    /// Changed locally.
    Edited,
    /// Deleted locally.
    LocalDelete,
    /// Deleted locally while changed on the server.
    DeleteModified,
    /// Changed locally while deleted on the server.
    ModifiedCorpse,
    /// Changed locally and on the server in colliding ways.
    Conflict,
}

impl SyncState {
    /// Every state.
    pub const ALL: [SyncState; 7] = [
        SyncState::Sync,
        SyncState::New,
        SyncState::Edited,
        SyncState::LocalDelete,
        SyncState::DeleteModified,
        SyncState::ModifiedCorpse,
        SyncState::Conflict,
    ];

    /// State after the item is deleted locally.
    #[must_use]
    pub const fn after_local_delete(self) -> Self {
        match self {
            SyncState::Sync | SyncState::Edited | SyncState::LocalDelete => SyncState::LocalDelete,
            SyncState::Conflict | SyncState::DeleteModified => SyncState::DeleteModified,
            // A local-only item is gone entirely.
            SyncState::New | SyncState::ModifiedCorpse => SyncState::Sync,
        }
    }

    /// State after the item is edited locally.
    #[must_use]
    pub const fn after_edit(self) -> Self {
        match self {
            SyncState::Sync | SyncState::LocalDelete => SyncState::Edited,
            SyncState::New
            | SyncState::Conflict
            | SyncState::ModifiedCorpse
            | SyncState::Edited => self,
            SyncState::DeleteModified => SyncState::Conflict,
        }
    }

    /// Returns true for states that need manual resolution.
    pub const fn is_conflict(self) -> bool {
        matches!(
            self,
            SyncState::DeleteModified | SyncState::ModifiedCorpse | SyncState::Conflict
        )
    }

    /// Returns true for states whose item exists only locally.
    pub const fn is_local_only(self) -> bool {
        matches!(self, SyncState::New | SyncState::ModifiedCorpse)
    }

    /// Returns true if there is nothing to upload or resolve.
    pub const fn is_synced(self) -> bool {
        matches!(self, SyncState::Sync)
    }

    /// Derives the state of `item` from its branches.
    pub fn of(reader: &dyn Reader, item: ItemId) -> Self {
        let trunk_deleted = reader.get_flag(item, &INVISIBLE);
        if let Some(conflict) = reader.get_map(item, &CONFLICT) {
            let server_deleted = schema::is_invisible(&conflict);
            return match (trunk_deleted, server_deleted) {
                (false, true) => SyncState::ModifiedCorpse,
                (true, false) => SyncState::DeleteModified,
                (true, true) => SyncState::Sync,
                (false, false) => SyncState::Conflict,
            };
        }
        match reader.get_map(item, &BASE) {
            None => SyncState::Sync,
            Some(base) if schema::is_invisible(&base) => {
                if trunk_deleted {
                    SyncState::Sync
                } else {
                    SyncState::New
                }
            }
            Some(_) if trunk_deleted => SyncState::LocalDelete,
            Some(_) => SyncState::Edited,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Sync => "SYNC",
            SyncState::New => "NEW",
            SyncState::Edited => "EDITED",
            SyncState::LocalDelete => "LOCAL_DELETE",
            SyncState::DeleteModified => "DELETE_MODIFIED",
            SyncState::ModifiedCorpse => "MODIFIED_CORPSE",
            SyncState::Conflict => "CONFLICT",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemsync_store::{AttributeMap, Store, Value};
    use proptest::prelude::*;

    #[test]
    fn transition_tables() {
        use SyncState::*;
        let delete = [
            (Sync, LocalDelete),
            (Edited, LocalDelete),
            (LocalDelete, LocalDelete),
            (Conflict, DeleteModified),
            (DeleteModified, DeleteModified),
            (New, Sync),
            (ModifiedCorpse, Sync),
        ];
        for (from, to) in delete {
            assert_eq!(from.after_local_delete(), to, "after_local_delete({from})");
        }
        let edit = [
            (Sync, Edited),
            (LocalDelete, Edited),
            (New, New),
            (Conflict, Conflict),
            (ModifiedCorpse, ModifiedCorpse),
            (Edited, Edited),
            (DeleteModified, Conflict),
        ];
        for (from, to) in edit {
            assert_eq!(from.after_edit(), to, "after_edit({from})");
        }
    }

    #[test]
    fn edit_then_delete_from_sync() {
        assert_eq!(
            SyncState::Sync.after_edit().after_local_delete(),
            SyncState::LocalDelete
        );
    }

    #[test]
    fn predicates() {
        let conflicts: Vec<_> = SyncState::ALL.into_iter().filter(|s| s.is_conflict()).collect();
        assert_eq!(
            conflicts,
            vec![
                SyncState::DeleteModified,
                SyncState::ModifiedCorpse,
                SyncState::Conflict
            ]
        );
        let local: Vec<_> = SyncState::ALL.into_iter().filter(|s| s.is_local_only()).collect();
        assert_eq!(local, vec![SyncState::New, SyncState::ModifiedCorpse]);
    }

    #[test]
    fn derived_from_shadows() {
        let store = Store::new();
        let cases = store
            .write_now(|w| {
                let mut items = Vec::new();
                let mut make = |base: Option<AttributeMap>, conflict: Option<AttributeMap>, deleted: bool| {
                    let item = w.create_item();
                    w.set(item, &schema::EXISTING, Some(Value::Bool(true)));
                    w.set(item, &BASE, base.map(Value::Map));
                    w.set(item, &CONFLICT, conflict.map(Value::Map));
                    if deleted {
                        w.set(item, &INVISIBLE, Some(Value::Bool(true)));
                    }
                    item
                };
                let visible = AttributeMap::new;
                items.push((make(None, None, false), SyncState::Sync));
                items.push((make(Some(schema::invisible_map()), None, false), SyncState::New));
                items.push((make(Some(schema::invisible_map()), None, true), SyncState::Sync));
                items.push((make(Some(visible()), None, false), SyncState::Edited));
                items.push((make(Some(visible()), None, true), SyncState::LocalDelete));
                items.push((make(Some(visible()), Some(visible()), false), SyncState::Conflict));
                items.push((make(Some(visible()), Some(visible()), true), SyncState::DeleteModified));
                items.push((
                    make(Some(visible()), Some(schema::invisible_map()), false),
                    SyncState::ModifiedCorpse,
                ));
                Ok(items)
            })
            .unwrap();
        store
            .read_now(|r| {
                for (item, expected) in &cases {
                    assert_eq!(SyncState::of(r, *item), *expected, "{item}");
                }
                Ok(())
            })
            .unwrap();
    }

    fn state_strategy() -> impl Strategy<Value = SyncState> {
        prop::sample::select(SyncState::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn transitions_are_total_and_idempotent(state in state_strategy()) {
            let deleted = state.after_local_delete();
            prop_assert!(SyncState::ALL.contains(&deleted));
            prop_assert_eq!(deleted.after_local_delete().after_local_delete(), deleted.after_local_delete());
            let edited = state.after_edit();
            prop_assert_eq!(edited.after_edit(), edited);
        }

        #[test]
        fn deleting_never_creates_conflict_from_clean_state(state in state_strategy()) {
            if !state.is_conflict() {
                prop_assert!(!state.after_local_delete().is_conflict());
            }
        }
    }
}
