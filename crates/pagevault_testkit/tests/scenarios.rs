//! End-to-end scenarios for keyed databases: wrong keys, rekey, attached
//! databases, tamper detection and export.

use pagevault_core::{
    CipherAlgorithm, CodecConfig, Connection, CoreError, Database, HmacAlgorithm, IvRule,
    PageNumber, SessionState,
};
use pagevault_storage::{InMemoryBackend, StorageBackend};
use pagevault_testkit::prelude::*;
use proptest::prelude::*;

fn open_on(disk: &InMemoryBackend) -> Database {
    Database::open_with_backends(
        fast_config(),
        Box::new(disk.clone()),
        Box::new(InMemoryBackend::new()),
    )
    .unwrap()
}

fn keyed_on(disk: &InMemoryBackend, key: &str) -> Result<Database, CoreError> {
    let mut db = open_on(disk);
    db.set_key(key)?;
    Ok(db)
}

#[test]
fn three_page_database_opens_only_with_its_key() {
    let disk = InMemoryBackend::new();
    let written = {
        let mut db = keyed_on(&disk, "alpha").unwrap();
        populate(&mut db, 3, 1).unwrap()
    };

    let db = keyed_on(&disk, "alpha").unwrap();
    assert_eq!(read_all(&db).unwrap(), written);

    let mut wrong = open_on(&disk);
    let err = wrong.set_key("beta").unwrap_err();
    assert!(err.is_integrity());
    assert_eq!(wrong.state(), SessionState::Locked);
    assert!(matches!(
        wrong.read_page(PageNumber::new(2)),
        Err(CoreError::SessionLocked)
    ));
}

#[test]
fn rekey_switches_keys() {
    let disk = InMemoryBackend::new();
    let written = {
        let mut db = keyed_on(&disk, "old").unwrap();
        let written = populate(&mut db, 4, 2).unwrap();
        db.rekey("new").unwrap();
        assert_eq!(read_all(&db).unwrap(), written);
        written
    };

    assert!(keyed_on(&disk, "old").unwrap_err().is_integrity());
    let db = keyed_on(&disk, "new").unwrap();
    assert_eq!(read_all(&db).unwrap(), written);
}

#[test]
fn rekey_changes_every_page_image() {
    let disk = InMemoryBackend::new();
    let mut db = keyed_on(&disk, "old").unwrap();
    populate(&mut db, 3, 3).unwrap();
    let before = disk.data();
    db.rekey("new").unwrap();
    let after = disk.data();

    assert_eq!(before.len(), after.len());
    let page_size = TEST_PAGE_SIZE as usize;
    for (old, new) in before.chunks(page_size).zip(after.chunks(page_size)) {
        assert_ne!(old, new);
    }
}

#[test]
fn attached_databases_are_keyed_independently() {
    let main_dir = TestDir::new();
    let aux_dir = TestDir::new();
    let aux_data = {
        let mut aux = aux_dir.open_keyed("aux-key").unwrap();
        populate(&mut aux, 2, 7).unwrap()
    };

    let mut conn = Connection::open(&main_dir.db_path(), fast_config()).unwrap();
    conn.set_key("main-key").unwrap();

    let err = conn
        .attach(&aux_dir.db_path(), "aux", "main-key")
        .unwrap_err();
    assert!(err.is_integrity());
    assert_eq!(conn.aliases(), vec!["main".to_string()]);

    conn.attach(&aux_dir.db_path(), "aux", "aux-key").unwrap();
    assert_eq!(
        conn.read_page("aux", PageNumber::new(2)).unwrap(),
        aux_data[1]
    );

    conn.with_database("aux", |db| db.rekey("aux-key-2")).unwrap();
    conn.with_database("main", |db| {
        let pgno = db.allocate_page()?;
        assert_eq!(db.state(), SessionState::Unlocked);
        db.read_page(pgno).map(|_| ())
    })
    .unwrap();
    conn.close().unwrap();

    assert!(main_dir.open_keyed("main-key").is_ok());
    assert!(aux_dir.open_keyed("aux-key").is_err());
    let aux = aux_dir.open_keyed("aux-key-2").unwrap();
    assert_eq!(read_all(&aux).unwrap(), aux_data);
}

#[test]
fn integrity_check_lists_tampered_pages() {
    let disk = InMemoryBackend::new();
    let mut db = keyed_on(&disk, "k").unwrap();
    populate(&mut db, 5, 4).unwrap();

    let page_size = TEST_PAGE_SIZE as usize;
    disk.corrupt_byte(page_size + 100, 0x01);
    disk.corrupt_byte(3 * page_size + page_size - 1, 0x80);

    let report = db.integrity_check().unwrap();
    assert_eq!(report.pages_checked, 5);
    assert_eq!(report.failed_pages, vec![2, 4]);
    assert!(!report.is_ok());
    assert!(db.read_page(PageNumber::new(2)).unwrap_err().is_integrity());
    assert!(db.read_page(PageNumber::new(3)).is_ok());
}

#[test]
fn swapped_pages_fail_authentication() {
    let disk = InMemoryBackend::new();
    {
        let mut db = keyed_on(&disk, "k").unwrap();
        populate(&mut db, 3, 5).unwrap();
    }

    let page_size = TEST_PAGE_SIZE as usize;
    let image = disk.data();
    let mut swapped = disk.clone();
    swapped
        .write_at(page_size as u64, &image[2 * page_size..3 * page_size])
        .unwrap();
    swapped
        .write_at(2 * page_size as u64, &image[page_size..2 * page_size])
        .unwrap();

    let db = keyed_on(&disk, "k").unwrap();
    assert_eq!(db.integrity_check().unwrap().failed_pages, vec![2, 3]);
}

#[test]
fn export_to_new_cipher_parameters() {
    let dir = TestDir::new();
    let source_path = dir.path().join("source.pvdb");
    let target_path = dir.path().join("target.pvdb");

    let mut source = Database::open(&source_path, fast_config()).unwrap();
    source.set_key("src").unwrap();
    let written = populate(&mut source, 4, 6).unwrap();

    let target_config = fast_config()
        .cipher(CipherAlgorithm::Aes256Ctr)
        .hmac(HmacAlgorithm::HmacSha256)
        .iv_rule(IvRule::RandomPerWrite)
        .reserve_size(source.params().reserve_size);
    source
        .export(&target_path, "dst", target_config)
        .unwrap();

    let mut target = Database::open(&target_path, CodecConfig::default()).unwrap();
    target.set_key("dst").unwrap();
    assert_eq!(target.params().cipher, CipherAlgorithm::Aes256Ctr);
    assert_eq!(target.params().iv_rule, IvRule::RandomPerWrite);
    assert_eq!(read_all(&target).unwrap(), written);

    // The source is untouched.
    assert_eq!(read_all(&source).unwrap(), written);
}

#[test]
fn export_refuses_a_different_page_capacity() {
    let dir = TestDir::new();
    let mut source = dir.open_keyed("k").unwrap();
    populate(&mut source, 2, 1).unwrap();

    let result = source.export(
        &dir.path().join("small.pvdb"),
        "k",
        fast_config().page_size(512),
    );
    assert!(matches!(result, Err(CoreError::InvalidConfig { .. })));
}

#[test]
fn cipher_status_reports_state_and_params() {
    let mut db = Database::open_in_memory(fast_config()).unwrap();
    let pending = db.cipher_status().unwrap();
    assert_eq!(pending.state, SessionState::KeyPending);
    assert!(pending.salt.is_none());

    db.set_key("k").unwrap();
    let status = db.cipher_status().unwrap();
    assert_eq!(status.state, SessionState::Unlocked);
    assert_eq!(status.params.page_size, TEST_PAGE_SIZE);
    assert_eq!(status.salt.map(|salt| salt.len()), Some(32));
    assert_eq!(status.usable_size, db.usable_size());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn only_the_right_key_opens(
        (right, wrong) in distinct_passphrases_strategy(),
        seed in any::<u8>(),
    ) {
        let disk = InMemoryBackend::new();
        let written = {
            let mut db = keyed_on(&disk, &right).unwrap();
            populate(&mut db, 2, seed).unwrap()
        };

        prop_assert!(keyed_on(&disk, &wrong).unwrap_err().is_integrity());
        let db = keyed_on(&disk, &right).unwrap();
        prop_assert_eq!(read_all(&db).unwrap(), written);
    }

    #[test]
    fn every_parameter_set_round_trips(params in cipher_params_strategy(), seed in any::<u8>()) {
        let mut db = Database::open_in_memory(config_for(&params)).unwrap();
        db.set_key("k").unwrap();
        let written = populate(&mut db, 3, seed).unwrap();
        prop_assert_eq!(db.params(), &params);
        prop_assert_eq!(read_all(&db).unwrap(), written);
        prop_assert!(db.integrity_check().unwrap().is_ok());
    }
}
