//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up keyed test databases
//! and filling them with recognisable page contents.

use pagevault_core::{CipherParams, CodecConfig, CoreResult, Database, PageNumber};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Passphrase used by the fixtures.
pub const TEST_KEY: &str = "pagevault test key";

/// Page size used by the fixtures.
pub const TEST_PAGE_SIZE: u32 = 1024;

/// A configuration with a small page and a two-round KDF, so tests do not
/// spend their time in PBKDF2.
pub fn fast_config() -> CodecConfig {
    CodecConfig::new()
        .page_size(TEST_PAGE_SIZE)
        .kdf_iterations(2)
        .sync_on_commit(false)
}

/// A configuration that creates databases with exactly `params`.
pub fn config_for(params: &CipherParams) -> CodecConfig {
    CodecConfig::new()
        .page_size(params.page_size)
        .kdf_iterations(params.kdf_iterations)
        .cipher(params.cipher)
        .hmac(params.hmac)
        .kdf(params.kdf)
        .iv_rule(params.iv_rule)
        .reserve_size(params.reserve_size)
        .sync_on_commit(false)
}

/// Deterministic page contents that differ per page and per `seed`.
pub fn pattern_page(pgno: PageNumber, seed: u8, len: usize) -> Vec<u8> {
    let base = seed.wrapping_mul(31).wrapping_add(pgno.as_u32() as u8);
    (0..len)
        .map(|i| base.wrapping_add((i % 251) as u8))
        .collect()
}

/// Fills a keyed database so it has `pages` pages, each holding
/// [`pattern_page`] data. Returns the data written, indexed from page 1.
pub fn populate(db: &mut Database, pages: u32, seed: u8) -> CoreResult<Vec<Vec<u8>>> {
    db.transaction(|db| {
        while db.page_count()? < pages {
            db.allocate_page()?;
        }
        let mut written = Vec::with_capacity(pages as usize);
        for pgno in 1..=pages {
            let pgno = PageNumber::new(pgno);
            let data = pattern_page(pgno, seed, db.page_capacity(pgno));
            db.write_page(pgno, &data)?;
            written.push(data);
        }
        Ok(written)
    })
}

/// Reads every page of `db`, indexed from page 1.
pub fn read_all(db: &Database) -> CoreResult<Vec<Vec<u8>>> {
    (1..=db.page_count()?)
        .map(|pgno| db.read_page(PageNumber::new(pgno)))
        .collect()
}

/// A keyed test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory database keyed with [`TEST_KEY`].
    pub fn memory() -> Self {
        Self::memory_with(fast_config())
    }

    /// Creates a new in-memory database with `config`, keyed with
    /// [`TEST_KEY`].
    pub fn memory_with(config: CodecConfig) -> Self {
        let mut db = Database::open_in_memory(config).expect("Failed to open in-memory database");
        db.set_key(TEST_KEY).expect("Failed to key database");
        Self {
            db,
            _temp_dir: None,
        }
    }

    /// Creates a new file-based database keyed with [`TEST_KEY`].
    pub fn file() -> Self {
        let dir = TestDir::new();
        let db = dir.open_keyed(TEST_KEY).expect("Failed to open file database");
        Self {
            db,
            _temp_dir: Some(dir.dir),
        }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

impl std::ops::DerefMut for TestDatabase {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.db
    }
}

/// A temporary directory holding one database file.
///
/// Unlike [`TestDatabase`] it does not keep a handle open, so tests can
/// close and reopen the file freely.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    /// Creates a new empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Path of the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the database file.
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("test.pvdb")
    }

    /// Opens the database file with [`fast_config`], without a key.
    pub fn open(&self) -> CoreResult<Database> {
        Database::open(&self.db_path(), fast_config())
    }

    /// Opens the database file and sets `key`.
    pub fn open_keyed(&self, key: &str) -> CoreResult<Database> {
        let mut db = self.open()?;
        db.set_key(key)?;
        Ok(db)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a keyed in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use pagevault_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let pgno = db.allocate_page().unwrap();
///         assert_eq!(pgno.as_u32(), 2);
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&mut Database) -> R,
{
    let mut test_db = TestDatabase::memory();
    f(&mut test_db.db)
}

/// Runs a test with a keyed file-based database and its path.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&mut Database, &Path) -> R,
{
    let dir = TestDir::new();
    let path = dir.db_path();
    let mut db = dir.open_keyed(TEST_KEY).expect("Failed to open file database");
    f(&mut db, &path)
}
