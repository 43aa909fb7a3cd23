//! Crash-point sweeps: an interrupted commit or rekey must reopen with
//! either none or all of its changes, never a mix.

use pagevault_core::{CoreResult, Database, PageNumber};
use pagevault_testkit::prelude::*;

const OLD_KEY: &str = "old key";
const NEW_KEY: &str = "new key";

fn seeded_store(pages: u32) -> (CrashStore, Vec<Vec<u8>>) {
    let store = CrashStore::new();
    let mut db = store.open(fast_config()).unwrap();
    db.set_key(OLD_KEY).unwrap();
    let written = populate(&mut db, pages, 11).unwrap();
    drop(db);
    (store, written)
}

fn reopen_with(store: &CrashStore, key: &str) -> CoreResult<Database> {
    let mut db = store.reopen(fast_config())?;
    db.set_key(key)?;
    Ok(db)
}

fn rekey_outcome(store: &CrashStore, expected: &[Vec<u8>]) -> CrashOutcome {
    if let Ok(db) = reopen_with(store, OLD_KEY) {
        assert_eq!(read_all(&db).unwrap(), expected, "old key sees a mixed image");
        return CrashOutcome::RolledBack;
    }
    let db = reopen_with(store, NEW_KEY).expect("neither key opens the database");
    assert_eq!(read_all(&db).unwrap(), expected, "new key sees a mixed image");
    CrashOutcome::Applied
}

#[test]
fn rekey_is_atomic_at_every_crash_point() {
    let (store, written) = seeded_store(4);
    let trace = store
        .measure(fast_config(), OLD_KEY, |db| db.rekey(NEW_KEY))
        .unwrap();
    let pristine = store.snapshot();

    let mut outcomes = Vec::new();
    for budget in trace.crash_points(8) {
        store.restore(&pristine);
        let mut db = store.open(fast_config()).unwrap();
        db.set_key(OLD_KEY).unwrap();
        store.crash_after(budget);
        let result = db.rekey(NEW_KEY);
        drop(db);

        let outcome = rekey_outcome(&store, &written);
        if result.is_ok() {
            assert_eq!(outcome, CrashOutcome::Applied, "budget {budget}");
        }
        outcomes.push(outcome);
    }

    assert_eq!(outcomes.first(), Some(&CrashOutcome::RolledBack));
    assert_eq!(outcomes.last(), Some(&CrashOutcome::Applied));
}

#[test]
fn failed_rekey_without_journal_keeps_old_key_live() {
    let (store, written) = seeded_store(3);
    let mut db = store.open(fast_config()).unwrap();
    db.set_key(OLD_KEY).unwrap();

    // Nothing reaches disk, so there is no journal to replay.
    store.crash_after(0);
    assert!(db.rekey(NEW_KEY).is_err());
    assert_eq!(store.snapshot().1.len(), 0);

    store.switch().disarm();
    assert_eq!(read_all(&db).unwrap(), written);
}

#[test]
fn rekey_interrupted_after_journal_locks_session() {
    let (store, written) = seeded_store(3);
    let trace = store
        .measure(fast_config(), OLD_KEY, |db| db.rekey(NEW_KEY))
        .unwrap();

    let mut db = store.open(fast_config()).unwrap();
    db.set_key(OLD_KEY).unwrap();
    // Leave the last page write torn.
    store.crash_after(trace.total - 10);
    assert!(db.rekey(NEW_KEY).is_err());
    assert_eq!(db.state(), pagevault_core::SessionState::Locked);
    drop(db);

    assert_eq!(rekey_outcome(&store, &written), CrashOutcome::RolledBack);
}

#[test]
fn commit_is_atomic_at_every_crash_point() {
    let (store, before) = seeded_store(3);
    let trace = store
        .measure(fast_config(), OLD_KEY, |db| {
            db.transaction(|db| {
                db.write_page(PageNumber::new(2), &vec![0xAA; db.page_capacity(PageNumber::new(2))])?;
                db.allocate_page()?;
                db.allocate_page().map(|_| ())
            })
        })
        .unwrap();
    let pristine = store.snapshot();

    for budget in trace.crash_points(8) {
        store.restore(&pristine);
        let mut db = store.open(fast_config()).unwrap();
        db.set_key(OLD_KEY).unwrap();
        store.crash_after(budget);
        let committed = db
            .transaction(|db| {
                let pgno = PageNumber::new(2);
                db.write_page(pgno, &vec![0xAA; db.page_capacity(pgno)])?;
                db.allocate_page()?;
                db.allocate_page().map(|_| ())
            })
            .is_ok();
        drop(db);

        let db = reopen_with(&store, OLD_KEY).unwrap();
        let pages = read_all(&db).unwrap();
        if pages.len() == before.len() {
            assert!(!committed, "budget {budget}: committed but rolled back");
            assert_eq!(pages, before, "budget {budget}");
        } else {
            assert_eq!(pages.len(), 5, "budget {budget}");
            assert_eq!(pages[0], before[0]);
            assert!(pages[1].iter().all(|&b| b == 0xAA));
            assert_eq!(pages[2], before[2]);
        }
        assert!(db.integrity_check().unwrap().is_ok());
    }
}

#[test]
fn torn_journal_is_discarded_on_open() {
    let (store, written) = seeded_store(2);
    let mut db = store.open(fast_config()).unwrap();
    db.set_key(OLD_KEY).unwrap();

    // The journal header is 24 bytes, so the crash tears the journal itself.
    store.crash_after(30);
    assert!(db.rekey(NEW_KEY).is_err());
    drop(db);
    assert!(!store.snapshot().1.is_empty());

    let db = reopen_with(&store, OLD_KEY).unwrap();
    assert_eq!(read_all(&db).unwrap(), written);
}
