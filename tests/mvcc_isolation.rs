//! MVCC Isolation Tests
//!
//! Snapshot visibility across concurrent sessions, first-updater-wins,
//! rollback, vacuum, and a randomized lost-update stress run.

mod common;

use common::*;
use hyperstore_storage::{Slot, SlotList, Snapshot};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Commit `name` for `id` on another thread
fn rename_elsewhere(t: &TestStore, id: &Identity, name: &str) {
    let db = t.db.clone();
    let id = id.clone();
    let name = name.to_string();
    thread::spawn(move || {
        db.transact(|s| s.execute(vec![GraphCommand::set_property(id, "name", json!(name))]))
            .map(|_| ())
    })
    .join()
    .unwrap()
    .unwrap();
}

// ============================================================================
// Slot selection
// ============================================================================

#[test]
fn slot_list_selects_version_per_snapshot() {
    let mut list = SlotList::new(Identity::new("hr", "e1"), NodeType::Entity);
    for (created, deleted) in [(1, None), (3, Some(5)), (5, None)] {
        let slot = Slot::new(created, format!("v{}", created));
        if let Some(xmax) = deleted {
            slot.mark_deleted(xmax);
        }
        list.add(Arc::new(slot));
    }

    assert_eq!(list.get_in_snapshot(&Snapshot::at(4)).unwrap().id(), 3);
    assert_eq!(list.get_in_snapshot(&Snapshot::at(6)).unwrap().id(), 5);
    assert!(list.get_in_snapshot(&Snapshot::at(0)).is_none());
}

// ============================================================================
// Visibility
// ============================================================================

#[test]
fn snapshot_reader_keeps_its_view() {
    let t = TestStore::new();
    let e1 = t.seed("e1", "v1");

    let reader = t.db.begin_session(SessionConfiguration::read_only()).unwrap();
    assert_eq!(t.hr.get_property(&reader, &e1, "name").unwrap(), Some(json!("v1")));

    rename_elsewhere(&t, &e1, "v2");
    assert_eq!(t.hr.get_property(&reader, &e1, "name").unwrap(), Some(json!("v1")));
    reader.close().unwrap();

    assert_eq!(t.name_of(&e1), Some(json!("v2")));
}

#[test]
fn read_committed_reader_sees_new_commits() {
    let t = TestStore::new();
    let e1 = t.seed("e1", "v1");

    let reader = t
        .db
        .begin_session(SessionConfiguration::read_only().isolation_level(IsolationLevel::ReadCommitted))
        .unwrap();
    assert_eq!(t.hr.get_property(&reader, &e1, "name").unwrap(), Some(json!("v1")));
    rename_elsewhere(&t, &e1, "v2");
    assert_eq!(t.hr.get_property(&reader, &e1, "name").unwrap(), Some(json!("v2")));
    reader.close().unwrap();
}

#[test]
fn uncommitted_changes_stay_private() {
    let t = TestStore::new();
    let e1 = t.seed("e1", "v1");
    let (written_tx, written_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let db = t.db.clone();
    let hr = Arc::clone(&t.hr);
    let id = e1.clone();
    let writer = thread::spawn(move || {
        let session = db.begin_session(SessionConfiguration::new()).unwrap();
        session
            .execute(vec![
                GraphCommand::set_property(id.clone(), "name", json!("v2")),
                add_employee("e2"),
            ])
            .unwrap();
        // own writes are visible to the writer
        assert_eq!(hr.get_property(&session, &id, "name").unwrap(), Some(json!("v2")));
        written_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        session.accept_changes();
        session.close().unwrap();
    });

    written_rx.recv().unwrap();
    assert_eq!(t.name_of(&e1), Some(json!("v1")));
    assert!(!t.exists(&employee_id("e2")));

    release_tx.send(()).unwrap();
    writer.join().unwrap();
    assert_eq!(t.name_of(&e1), Some(json!("v2")));
    assert!(t.exists(&employee_id("e2")));
}

// ============================================================================
// Write conflicts
// ============================================================================

#[test]
fn first_updater_wins_under_snapshot() {
    let t = TestStore::new();
    let e1 = t.seed("e1", "v1");

    let session = t.begin();
    assert_eq!(session.isolation_level(), IsolationLevel::Snapshot);
    rename_elsewhere(&t, &e1, "v2");

    let err = session
        .execute(vec![GraphCommand::set_property(e1.clone(), "name", json!("v3"))])
        .unwrap_err();
    let Error::Session(messages) = err else {
        panic!("expected session error");
    };
    assert!(messages[0].message.starts_with("Command aborted"));
    assert!(session.is_aborted());
    session.accept_changes();
    assert!(session.close().is_err());

    assert_eq!(t.name_of(&e1), Some(json!("v2")));
}

#[test]
fn read_committed_writer_updates_latest_version() {
    let t = TestStore::new();
    let e1 = t.seed("e1", "v1");

    let session = t
        .db
        .begin_session(SessionConfiguration::new().isolation_level(IsolationLevel::ReadCommitted))
        .unwrap();
    rename_elsewhere(&t, &e1, "v2");

    let result = session
        .execute(vec![GraphCommand::set_property(e1.clone(), "name", json!("v3"))])
        .unwrap();
    assert!(result.succeeded());
    let events = session.events();
    match &events[0].kind {
        EventKind::PropertyChanged { old_value, .. } => assert_eq!(old_value, &Some(json!("v2"))),
        other => panic!("unexpected event {:?}", other),
    }
    session.accept_changes();
    session.close().unwrap();

    assert_eq!(t.name_of(&e1), Some(json!("v3")));
}

#[test]
fn serializable_reads_block_writers() {
    let t = TestStore::with(|b| b.lock_timeout(std::time::Duration::from_millis(100)));
    let e1 = t.seed("e1", "v1");

    let reader = t
        .db
        .begin_session(SessionConfiguration::read_only().isolation_level(IsolationLevel::Serializable))
        .unwrap();
    assert_eq!(t.hr.get_property(&reader, &e1, "name").unwrap(), Some(json!("v1")));
    assert_eq!(reader.lock_count(), 1);

    let db = t.db.clone();
    let id = e1.clone();
    let blocked = thread::spawn(move || {
        db.transact(|s| s.execute(vec![GraphCommand::set_property(id, "name", json!("v2"))]))
            .map(|_| ())
    })
    .join()
    .unwrap();
    assert!(matches!(blocked, Err(Error::Session(_))));

    reader.close().unwrap();
    rename_elsewhere(&t, &e1, "v2");
    assert_eq!(t.name_of(&e1), Some(json!("v2")));
}

// ============================================================================
// Rollback
// ============================================================================

#[test]
fn rejected_session_restores_previous_state() {
    let t = TestStore::new();
    let e1 = t.seed("e1", "v1");
    let e2 = t.seed("e2", "Bob");

    let session = t.begin();
    session
        .execute(vec![
            GraphCommand::set_property(e1.clone(), "name", json!("v2")),
            GraphCommand::add_relationship(
                Identity::new("hr", "r1"),
                Identity::new("hr", "ReportsTo"),
                e1.clone(),
                e2.clone(),
            ),
            GraphCommand::remove_entity(e2.clone()),
        ])
        .unwrap();
    assert_eq!(session.element_state(&e2), Some(TrackingState::Removed));
    assert_eq!(t.hr.relationships(&session, &e1).unwrap().len(), 1);
    session.reject_changes();
    session.close().unwrap();

    assert_eq!(t.name_of(&e1), Some(json!("v1")));
    assert_eq!(t.name_of(&e2), Some(json!("Bob")));
    let hr = Arc::clone(&t.hr);
    assert!(t.db.read(|s| hr.relationships(s, &e1)).unwrap().is_empty());
    let names: Vec<_> = t.db.read(|s| hr.elements(s)).unwrap().into_iter().map(|n| n.id).collect();
    assert_eq!(names, vec![e1, e2]);
}

// ============================================================================
// Vacuum
// ============================================================================

#[test]
fn vacuum_keeps_versions_live_snapshots_need() {
    let t = TestStore::new();
    let e1 = t.seed("e1", "v1");

    let reader = t.db.begin_session(SessionConfiguration::read_only()).unwrap();
    rename_elsewhere(&t, &e1, "v2");
    rename_elsewhere(&t, &e1, "v3");

    let stats = t.db.vacuum();
    assert_eq!(stats.slots_removed, 0);
    assert_eq!(t.hr.get_property(&reader, &e1, "name").unwrap(), Some(json!("v1")));
    reader.close().unwrap();

    let stats = t.db.vacuum();
    assert_eq!(stats.slots_removed, 2);
    assert_eq!(t.db.graph().slot_count(&e1.create_attribute_identity("name")), 1);
    assert_eq!(t.name_of(&e1), Some(json!("v3")));
}

#[test]
fn vacuum_keeps_values_rewritten_in_one_session() {
    let t = TestStore::new();
    let e1 = employee_id("e1");
    t.db.transact(|s| {
        s.execute(vec![
            add_employee("e1"),
            GraphCommand::set_property(e1.clone(), "name", json!("Ada")),
            GraphCommand::set_property(e1.clone(), "name", json!("Bob")),
        ])
    })
    .unwrap();
    assert_eq!(t.name_of(&e1), Some(json!("Bob")));

    let stats = t.db.vacuum();
    assert_eq!(stats.slots_removed, 1);
    assert_eq!(stats.lists_dropped, 0);
    assert_eq!(t.name_of(&e1), Some(json!("Bob")));
    assert!(t.exists(&e1));
}

// ============================================================================
// Stress
// ============================================================================

#[test]
fn concurrent_increments_lose_no_updates() {
    const WORKERS: usize = 4;
    const ROUNDS: usize = 40;
    const COUNTERS: usize = 3;

    let t = TestStore::with(|b| b.max_sessions(WORKERS + 2));
    let counters: Vec<Identity> = (0..COUNTERS).map(|i| t.seed(&format!("c{}", i), "counter")).collect();
    let committed = Arc::new(AtomicU64::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let vacuum = {
        let db = t.db.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                db.vacuum();
                thread::yield_now();
            }
        })
    };

    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let db = t.db.clone();
            let hr = Arc::clone(&t.hr);
            let counters = counters.clone();
            let committed = Arc::clone(&committed);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..ROUNDS {
                    let id = counters[rng.gen_range(0..counters.len())].clone();
                    loop {
                        let outcome = db.transact(|s| {
                            let n = hr.get_property(s, &id, "n")?.and_then(|v| v.as_u64()).unwrap_or(0);
                            s.execute(vec![GraphCommand::set_property(id.clone(), "n", json!(n + 1))])
                        });
                        if outcome.is_ok() {
                            committed.fetch_add(1, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    vacuum.join().unwrap();

    let hr = Arc::clone(&t.hr);
    let total: u64 = t
        .db
        .read(|s| {
            counters
                .iter()
                .map(|id| Ok(hr.get_property(s, id, "n")?.and_then(|v| v.as_u64()).unwrap_or(0)))
                .sum::<Result<u64>>()
        })
        .unwrap();
    assert_eq!(committed.load(Ordering::SeqCst), (WORKERS * ROUNDS) as u64);
    assert_eq!(total, (WORKERS * ROUNDS) as u64);
    assert_eq!(t.db.active_sessions(), 0);
    assert!(t.db.lock_manager().locked_resources().is_empty());
}
