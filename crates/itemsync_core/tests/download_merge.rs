//! Downloads, auto-merge and conflicts.

use itemsync_core::schema::{CONFLICT, DOWNLOAD, INVISIBLE};
use itemsync_core::{
    Drain, DownloadDrain, DownloadProcedure, EditDrain, MergeEvent, MergePolicy, PolicyAutoMerge,
    SyncState, UniformMergeSelector, Writable,
};
use itemsync_store::{Aborted, Lifespan, Value};
use itemsync_testkit::prelude::*;
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;

fn flush(fixture: &SyncFixture) {
    fixture.store.write(|_| Ok(())).wait().expect("flush");
}

#[test]
fn download_into_synced_item_goes_to_trunk() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    let merged = fixture.download_values(a, &[(&*SUMMARY, Value::from("server"))]);
    assert!(merged.is_empty());
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("server")));
    assert_eq!(fixture.state(a), SyncState::Sync);
    assert!(fixture.read(|reader| reader.get(a, &DOWNLOAD)).is_none());
}

#[test]
fn disjoint_changes_merge_automatically() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[
        (&*SUMMARY, Value::from("first")),
        (&*PRIORITY, Value::Int(1)),
    ]);
    assert!(fixture.edit(a, &SUMMARY, "local"));

    let merged = fixture.download_values(a, &[(&*PRIORITY, Value::Int(3))]);
    assert_eq!(merged.get(&a), Some(&SyncState::Edited));
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("local")));
    assert_eq!(fixture.trunk(a, &PRIORITY), Some(Value::Int(3)));
}

#[test]
fn same_change_on_both_sides_settles() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    assert!(fixture.edit(a, &SUMMARY, "agreed"));
    let merged = fixture.download_values(a, &[(&*SUMMARY, Value::from("agreed"))]);
    assert_eq!(merged.get(&a), Some(&SyncState::Sync));
}

#[test]
fn colliding_change_becomes_conflict() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    assert!(fixture.edit(a, &SUMMARY, "local"));

    let merged = fixture.download_values(a, &[(&*SUMMARY, Value::from("server"))]);
    assert_eq!(merged.get(&a), Some(&SyncState::Conflict));
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("local")));
    assert!(fixture.read(|reader| reader.get(a, &CONFLICT)).is_some());
}

#[test]
fn conflict_resolved_by_later_auto_merge() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    assert!(fixture.edit(a, &SUMMARY, "local"));
    fixture.download_values(a, &[(&*SUMMARY, Value::from("server"))]);
    assert_eq!(fixture.state(a), SyncState::Conflict);

    let selector = TestMergeSelector::new();
    selector.set(
        a,
        Arc::new(FnMerge(|data: &mut itemsync_core::AutoMergeData| {
            let unresolved: Vec<_> = data.unresolved().iter().cloned().collect();
            data.discard_edit(&unresolved);
        })),
    );
    fixture.manager.set_merge_selector(selector.clone());
    let merged = fixture
        .manager
        .request_auto_merge(&[a])
        .wait()
        .expect("merge");
    assert_eq!(merged.get(&a), Some(&SyncState::Sync));
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("server")));
    assert!(selector.lookups() > 0);
}

#[test]
fn conflict_discarded_by_editor() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    assert!(fixture.edit(a, &SUMMARY, "local"));
    fixture.download_values(a, &[(&*SUMMARY, Value::from("server"))]);

    assert!(fixture.commit(&[a], move |drain: &mut EditDrain<'_>| {
        drain.discard_changes(a);
        Ok(())
    }));
    assert_eq!(fixture.state(a), SyncState::Sync);
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("server")));
}

#[test]
fn conflict_accepted_by_mark_merged() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    assert!(fixture.edit(a, &SUMMARY, "local"));
    fixture.download_values(a, &[(&*SUMMARY, Value::from("server"))]);

    assert!(fixture.commit(&[a], move |drain: &mut EditDrain<'_>| {
        drain.mark_merged(a);
        Ok(())
    }));
    assert_eq!(fixture.state(a), SyncState::Edited);
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("local")));
}

#[test]
fn policy_merge_local_wins() {
    let fixture = SyncFixture::new();
    fixture
        .manager
        .set_merge_selector(Arc::new(UniformMergeSelector(Arc::new(
            PolicyAutoMerge::new(MergePolicy::Manual).with(&SUMMARY, MergePolicy::LocalWins),
        ))));
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    assert!(fixture.edit(a, &SUMMARY, "local"));

    let merged = fixture.download_values(a, &[(&*SUMMARY, Value::from("server"))]);
    assert_eq!(merged.get(&a), Some(&SyncState::Edited));
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("local")));
}

#[test]
fn server_delete_of_edited_item_is_modified_corpse() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    assert!(fixture.edit(a, &SUMMARY, "local"));
    let merged = fixture.download_delete(a);
    assert_eq!(merged.get(&a), Some(&SyncState::ModifiedCorpse));
    assert!(!fixture.read(|reader| reader.get_flag(a, &INVISIBLE)));
}

#[test]
fn local_delete_against_server_edit_is_delete_modified() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    assert!(fixture.delete(a));
    let merged = fixture.download_values(a, &[(&*SUMMARY, Value::from("server"))]);
    assert_eq!(merged.get(&a), Some(&SyncState::DeleteModified));
}

#[test]
fn server_delete_of_synced_item() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    fixture.download_delete(a);
    assert!(fixture.read(|reader| reader.get_flag(a, &INVISIBLE)));
    assert_eq!(fixture.state(a), SyncState::Sync);
}

#[test]
fn merge_of_locked_item_waits_for_release() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");

    let merged = fixture.download_values(a, &[(&*SUMMARY, Value::from("server"))]);
    assert!(merged.is_empty());
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("first")));
    assert!(fixture.read(|reader| reader.get(a, &DOWNLOAD)).is_some());

    drop(control);
    flush(&fixture);
    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("server")));
    assert!(fixture.read(|reader| reader.get(a, &DOWNLOAD)).is_none());
}

#[test]
fn download_during_edit_keeps_editor_base() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[
        (&*SUMMARY, Value::from("first")),
        (&*PRIORITY, Value::Int(1)),
    ]);
    let control = fixture.manager.prepare_edit(&[a]).expect("free");
    let factory = TestEditorFactory::new();
    assert!(control.start(factory.clone()));
    assert!(factory.wait_for(&EditorEvent::Shown, WAIT));

    fixture.download_values(a, &[(&*PRIORITY, Value::Int(4))]);
    assert!(control.commit(move |drain: &mut EditDrain<'_>| {
        drain.change_item(a).set(&SUMMARY, "local");
        Ok(())
    }));
    assert!(factory.wait_for(&EditorEvent::Released, WAIT));
    flush(&fixture);

    assert_eq!(fixture.trunk(a, &SUMMARY), Some(Value::from("local")));
    assert_eq!(fixture.trunk(a, &PRIORITY), Some(Value::Int(4)));
    assert_eq!(fixture.state(a), SyncState::Edited);
}

#[test]
fn merge_listener_sees_conflicts() {
    let fixture = SyncFixture::new();
    let life = Lifespan::new();
    let (tx, rx) = mpsc::channel();
    fixture.manager.add_listener(
        &life,
        Arc::new(move |event: &MergeEvent| {
            let _ = tx.send(event.items.clone());
        }),
    );
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    assert!(fixture.edit(a, &SUMMARY, "local"));
    let edited = rx.recv_timeout(WAIT).expect("edit merged");
    assert_eq!(edited.get(&a), Some(&SyncState::Edited));

    fixture.download_values(a, &[(&*SUMMARY, Value::from("server"))]);
    let conflict = rx.recv_timeout(WAIT).expect("download merged");
    assert_eq!(conflict.get(&a), Some(&SyncState::Conflict));

    life.end();
    fixture.download_values(a, &[(&*SUMMARY, Value::from("again"))]);
    assert!(rx.recv_timeout(std::time::Duration::from_millis(100)).is_err());
}

struct Batch {
    values: Vec<(itemsync_store::ItemId, i64)>,
    finished: mpsc::Sender<bool>,
}

impl DownloadProcedure for Batch {
    fn write(&mut self, drain: &mut DownloadDrain<'_>) -> Result<(), Aborted> {
        for (item, priority) in &self.values {
            drain.change_item(*item).set(&PRIORITY, *priority);
        }
        Ok(())
    }

    fn on_finished(&mut self, success: bool) {
        let _ = self.finished.send(success);
    }
}

#[test]
fn download_procedure_reports_finish() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*PRIORITY, Value::Int(1))]);
    let b = fixture.create_synced(&[(&*PRIORITY, Value::Int(1))]);
    assert!(fixture.edit(b, &SUMMARY, "local"));

    let (tx, rx) = mpsc::channel();
    let merged = fixture
        .manager
        .write_downloaded(Batch {
            values: vec![(a, 2), (b, 3)],
            finished: tx,
        })
        .wait()
        .expect("download");
    assert_eq!(rx.recv_timeout(WAIT), Ok(true));
    assert_eq!(merged, BTreeMap::from([(b, SyncState::Edited)]));
    assert_eq!(fixture.trunk(a, &PRIORITY), Some(Value::Int(2)));
    assert_eq!(fixture.trunk(b, &PRIORITY), Some(Value::Int(3)));
}

#[test]
fn failed_download_writes_nothing() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*PRIORITY, Value::Int(1))]);
    let result = fixture
        .manager
        .download(move |drain: &mut DownloadDrain<'_>| {
            drain.change_item(a).set(&PRIORITY, 9i64);
            Err(Aborted::new("connection lost"))
        })
        .wait();
    assert!(result.is_err());
    assert_eq!(fixture.trunk(a, &PRIORITY), Some(Value::Int(1)));
}

#[test]
fn downloaded_slaves_follow_master() {
    let fixture = SyncFixture::new();
    let a = fixture.create_synced(&[(&*SUMMARY, Value::from("first"))]);
    let comment = fixture.create_synced_slave(a, &PARENT, &[(&*BODY, Value::from("hi"))]);
    fixture.download_delete(a);
    assert!(fixture.read(|reader| reader.get_flag(comment, &INVISIBLE)));
}
