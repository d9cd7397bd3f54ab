//! Edit sessions and the lock table.

use itemsync_core::{Drain, EditDrain, EditPhase, Readable, SyncState, Writable};
use itemsync_store::{Aborted, Value};
use itemsync_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::mpsc;

fn issue(fixture: &SyncFixture) -> itemsync_store::ItemId {
    fixture.create_synced(&[(&*SUMMARY, Value::from("first"))])
}

#[test]
fn locks_are_all_or_nothing() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let b = issue(&fixture);
    let c = issue(&fixture);

    let first = fixture.manager.prepare_edit(&[a, b]).expect("a and b are free");
    assert!(fixture.manager.prepare_edit(&[b, c]).is_none());
    // The refused request locked nothing.
    assert!(!fixture.manager.is_locked(c));
    let second = fixture.manager.prepare_edit(&[c]).expect("c is free");

    assert_eq!(first.items(), vec![a, b]);
    assert_eq!(fixture.manager.locked_count(), 3);
    first.release();
    second.release();
    assert_eq!(fixture.manager.locked_count(), 0);
    assert!(fixture.manager.prepare_edit(&[a, b, c]).is_some());
}

#[test]
fn dropping_unstarted_edit_releases_locks() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    {
        let _control = fixture.manager.prepare_edit(&[a]).expect("free");
        assert!(fixture.manager.is_locked(a));
    }
    assert!(!fixture.manager.is_locked(a));
}

#[test]
fn handles_do_not_release_on_drop() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    drop(fixture.manager.find_lock(a).expect("locked"));
    assert!(fixture.manager.is_locked(a));
    drop(control);
    assert!(fixture.manager.find_lock(a).is_none());
}

#[test]
#[should_panic(expected = "released twice")]
fn double_release_panics() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    control.release();
    control.release();
}

#[test]
fn editor_lifecycle() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    let factory = TestEditorFactory::new();
    assert!(control.start(factory.clone()));
    assert!(!control.start(factory.clone()), "second start is refused");
    assert!(factory.wait_for(&EditorEvent::Shown, WAIT));
    assert_eq!(control.phase(), EditPhase::Editing);
    assert!(control.base(a).is_some());

    assert!(control.commit(move |drain: &mut EditDrain<'_>| {
        drain.change_item(a).set(&SUMMARY, "second");
        Ok(())
    }));
    assert!(factory.wait_for(&EditorEvent::Released, WAIT));
    assert_eq!(control.phase(), EditPhase::Released);
    assert!(!fixture.manager.is_locked(a));
    assert_eq!(fixture.state(a), SyncState::Edited);
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("second")));
}

#[test]
fn failed_commit_keeps_editing() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    let factory = TestEditorFactory::new();
    assert!(control.start(factory.clone()));
    assert!(factory.wait_for(&EditorEvent::Shown, WAIT));

    let (tx, rx) = mpsc::channel();
    struct Failing(mpsc::Sender<bool>);
    impl itemsync_core::EditCommit for Failing {
        fn perform_commit(&mut self, _drain: &mut EditDrain<'_>) -> Result<(), Aborted> {
            Err(Aborted::new("validation failed"))
        }
        fn on_commit_finished(&mut self, success: bool) {
            let _ = self.0.send(success);
        }
    }
    assert!(control.commit(Failing(tx)));
    assert_eq!(rx.recv_timeout(WAIT), Ok(false));
    assert_eq!(control.phase(), EditPhase::Editing);
    assert!(fixture.manager.is_locked(a));
    assert_eq!(fixture.state(a), SyncState::Sync);
}

#[test]
fn declining_factory_cancels_edit() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    let factory = TestEditorFactory::declining();
    assert!(control.start(factory.clone()));
    assert!(factory.wait_for(&EditorEvent::Cancelled, WAIT));
    assert!(!fixture.manager.is_locked(a));
}

#[test]
fn aborting_factory_cancels_edit() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    let factory = TestEditorFactory::aborting();
    assert!(control.start(factory.clone()));
    assert!(factory.wait_for(&EditorEvent::Cancelled, WAIT));
    assert_eq!(control.phase(), EditPhase::Released);
}

#[test]
fn factory_can_lock_more_items() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let b = issue(&fixture);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    let factory = TestEditorFactory::including(vec![b]);
    assert!(control.start(factory.clone()));
    assert!(factory.wait_for(&EditorEvent::Shown, WAIT));
    assert_eq!(control.items(), vec![a, b]);
    assert!(fixture.manager.is_locked(b));
    assert!(control.base(b).is_some());
}

#[test]
fn include_grows_edit() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let b = issue(&fixture);
    let c = issue(&fixture);
    let other = fixture.manager.prepare_edit(&[c]).expect("free");
    let control = fixture.manager.prepare_edit(&[a]).expect("free");

    assert!(!control.include(&[b, c], |_, _| Ok(())), "c is locked elsewhere");
    assert!(!fixture.manager.is_locked(b));

    let (tx, rx) = mpsc::channel();
    assert!(control.include(&[b], move |reader, added| {
        let _ = tx.send((added.to_vec(), reader.get(added[0], &SUMMARY)));
        Ok(())
    }));
    let (added, summary) = rx.recv_timeout(WAIT).expect("loader ran");
    assert_eq!(added, vec![b]);
    assert_eq!(summary, Some(Value::from("first")));
    assert_eq!(control.items(), vec![a, b]);
    drop(other);
}

#[test]
fn failing_loader_keeps_items_locked() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let b = issue(&fixture);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    let (tx, rx) = mpsc::channel();
    assert!(control.include(&[b], move |_, _| {
        let _ = tx.send(());
        Err(Aborted::new("loader failed"))
    }));
    rx.recv_timeout(WAIT).expect("loader ran");
    assert!(fixture.manager.is_locked(b));
    control.release();
    assert!(!fixture.manager.is_locked(b));
}

#[test]
fn dead_editor_lock_is_reclaimed() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    let factory = TestEditorFactory::new();
    assert!(control.start(factory.clone()));
    assert!(factory.wait_for(&EditorEvent::Shown, WAIT));
    assert!(fixture.manager.prepare_edit(&[a]).is_none());

    factory.kill();
    let reclaimed = fixture.manager.prepare_edit(&[a]);
    assert!(reclaimed.is_some());
    assert_eq!(control.phase(), EditPhase::Released);
}

#[test]
fn commit_edit_releases_after_commit() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    assert!(fixture.edit(a, &SUMMARY, "second"));
    assert!(!fixture.manager.is_locked(a));
    assert_eq!(fixture.state(a), SyncState::Edited);

    let held = fixture.manager.prepare_edit(&[a]).expect("free");
    assert!(!fixture.edit(a, &SUMMARY, "third"), "locked by another edit");
    drop(held);
}

#[test]
fn reverting_an_edit_returns_to_sync() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    assert!(fixture.edit(a, &SUMMARY, "second"));
    assert!(fixture.edit(a, &SUMMARY, "first"));
    assert_eq!(fixture.state(a), SyncState::Sync);
}

#[test]
fn unlocked_commit_refuses_shadowable_writes() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    assert!(!fixture.commit_unlocked(move |drain: &mut EditDrain<'_>| {
        drain.change_item(a).set(&SUMMARY, "sneaky");
        Ok(())
    }));
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("first")));

    assert!(fixture.commit_unlocked(move |drain: &mut EditDrain<'_>| {
        drain.change_item(a).set(&VIEWED, true);
        Ok(())
    }));
    assert_eq!(fixture.trunk(a, &VIEWED), Some(Value::Bool(true)));
    assert_eq!(fixture.state(a), SyncState::Sync);
}

#[test]
fn unlocked_commit_creates_new_items() {
    let fixture = SyncFixture::new();
    let (tx, rx) = mpsc::channel();
    assert!(fixture.commit_unlocked(move |drain: &mut EditDrain<'_>| {
        let mut creator = drain.create_item();
        creator.set(&SUMMARY, "draft");
        let _ = tx.send(creator.item());
        Ok(())
    }));
    let created = rx.recv_timeout(WAIT).expect("created");
    assert_eq!(fixture.state(created), SyncState::New);

    assert!(fixture.delete(created));
    assert_eq!(fixture.state(created), SyncState::Sync);
}

#[test]
fn unsafe_change_notifies_editor() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    let factory = TestEditorFactory::new();
    assert!(control.start(factory.clone()));
    assert!(factory.wait_for(&EditorEvent::Shown, WAIT));

    assert!(fixture.commit_unlocked(move |drain: &mut EditDrain<'_>| {
        drain.unsafe_change(a).set(&PRIORITY, 2i64);
        Ok(())
    }));
    let changes = factory.wait_items_changed(WAIT).expect("notified");
    assert_eq!(changes[&a].get(&PRIORITY), Some(&Value::Int(2)));
    assert_eq!(fixture.state(a), SyncState::Edited);
}

#[test]
fn delete_cascades_to_slaves_and_revives() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let comment = fixture.create_synced_slave(a, &PARENT, &[(&*BODY, Value::from("hello"))]);

    assert!(fixture.delete(a));
    assert_eq!(fixture.state(a), SyncState::LocalDelete);
    assert_eq!(fixture.state(comment), SyncState::LocalDelete);

    assert!(fixture.commit(&[a], move |drain: &mut EditDrain<'_>| {
        drain.change_item(a).set_alive();
        drain.change_item(comment).set_alive();
        Ok(())
    }));
    assert_eq!(fixture.state(a), SyncState::Sync);
    assert_eq!(fixture.state(comment), SyncState::Sync);
}

#[test]
fn lock_changes_fire_modifiable() {
    let fixture = SyncFixture::new();
    let a = issue(&fixture);
    let life = itemsync_store::Lifespan::new();
    let (tx, rx) = mpsc::channel();
    fixture
        .manager
        .modifiable()
        .add_listener(&life, itemsync_store::Gate::Straight, move || {
            let _ = tx.send(());
        });
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    rx.recv_timeout(WAIT).expect("lock fired");
    control.release();
    rx.recv_timeout(WAIT).expect("release fired");
    life.end();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn intersecting_edits_exclude_each_other(
        first in item_set_strategy(6, 4),
        second in item_set_strategy(6, 4),
    ) {
        let fixture = SyncFixture::new();
        let held = fixture.manager.prepare_edit(&first);
        prop_assert!(held.is_some());
        let other = fixture.manager.prepare_edit(&second);
        let disjoint = first.iter().all(|item| !second.contains(item));
        prop_assert_eq!(other.is_some(), disjoint);
        drop(other);
        drop(held);
        prop_assert!(fixture.manager.prepare_edit(&second).is_some());
    }
}
