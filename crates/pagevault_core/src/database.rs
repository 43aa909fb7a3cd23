//! Database facade: one encrypted file, its pager and its key session.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use pagevault_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::PageCodec;
use crate::config::CodecConfig;
use crate::error::{CoreError, CoreResult};
use crate::header::{CodecHeader, HEADER_SIZE};
use crate::journal;
use crate::kdf::KeyMaterial;
use crate::pager::Pager;
use crate::params::{CipherParams, FORMAT_VERSION};
use crate::session::{KeySession, SessionState};
use crate::types::PageNumber;

/// Effective cipher settings of an open handle.
#[derive(Debug, Clone, Serialize)]
pub struct CipherStatus {
    /// Session state.
    pub state: SessionState,
    /// On-disk format version.
    pub format_version: u8,
    /// Cipher parameters in effect.
    pub params: CipherParams,
    /// Hex salt, once the file has a header.
    pub salt: Option<String>,
    /// Pages in the file.
    pub page_count: u32,
    /// Bytes per page left for data.
    pub usable_size: usize,
}

/// Result of [`Database::integrity_check`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Number of pages verified.
    pub pages_checked: u32,
    /// Pages whose tag did not verify, in ascending order.
    pub failed_pages: Vec<u32>,
}

impl IntegrityReport {
    /// Returns true if every page verified.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failed_pages.is_empty()
    }
}

/// An encrypted page-oriented database file.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use pagevault_core::{CodecConfig, Database, PageNumber};
///
/// let mut db = Database::open(Path::new("app.db"), CodecConfig::default())?;
/// db.set_key("correct horse battery staple")?;
///
/// let pgno = db.allocate_page()?;
/// db.write_page(pgno, &vec![7u8; db.page_capacity(pgno)])?;
/// db.close()?;
/// ```
///
/// Every page access before [`Database::set_key`] fails. A wrong key fails
/// with [`CoreError::Integrity`] on `set_key` itself, and the handle stays
/// locked until it is dropped and reopened.
pub struct Database {
    config: CodecConfig,
    path: Option<PathBuf>,
    pager: Pager,
    session: KeySession,
}

/// Path of the rollback journal for a database file.
#[must_use]
pub fn journal_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push("-journal");
    PathBuf::from(name)
}

impl Database {
    /// Opens or creates a database file.
    ///
    /// Takes an exclusive lock on the file and rolls back a hot journal
    /// left by an interrupted commit.
    ///
    /// # Errors
    ///
    /// `DatabaseLocked` if another handle holds the file, `InvalidOperation`
    /// if the file is missing and `create_if_missing` is off,
    /// `UnsupportedFormat` for a file that is not a PageVault database.
    pub fn open(path: &Path, config: CodecConfig) -> CoreResult<Self> {
        if !config.create_if_missing && !path.exists() {
            return Err(CoreError::invalid_operation(format!(
                "database does not exist: {}",
                path.display()
            )));
        }

        let db = FileBackend::open_exclusive(path).map_err(|e| match e {
            StorageError::Locked { .. } => CoreError::DatabaseLocked,
            other => CoreError::Storage(other),
        })?;
        let journal = FileBackend::open(&journal_path(path))?;

        let mut database = Self::open_with_backends(config, Box::new(db), Box::new(journal))?;
        database.path = Some(path.to_path_buf());
        debug!(path = %path.display(), "opened database file");
        Ok(database)
    }

    /// Opens a database over caller-supplied backends.
    ///
    /// # Errors
    ///
    /// Same as [`Database::open`], minus locking.
    pub fn open_with_backends(
        config: CodecConfig,
        mut db: Box<dyn StorageBackend>,
        mut journal: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        journal::recover(db.as_mut(), journal.as_mut())?;

        let header = read_header(db.as_ref())?;
        let params = match &header {
            Some(header) => {
                if config.differs_from(&header.params) {
                    warn!(
                        file = ?header.params,
                        "file cipher parameters differ from configuration; using the file's"
                    );
                }
                header.params
            }
            None => config.cipher_params()?,
        };

        let pager = Pager::new(db, journal, params.page_size(), config.sync_on_commit);
        let session = KeySession::open(header, params);
        Ok(Self {
            config,
            path: None,
            pager,
            session,
        })
    }

    /// Opens a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an unusable configuration.
    pub fn open_in_memory(config: CodecConfig) -> CoreResult<Self> {
        Self::open_with_backends(
            config,
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    /// Supplies the key. Must be called before any page access.
    ///
    /// # Errors
    ///
    /// See [`KeySession::set_key`].
    pub fn set_key(&mut self, key: impl Into<KeyMaterial>) -> CoreResult<()> {
        self.session.set_key(&mut self.pager, &key.into())
    }

    /// Re-encrypts the whole database under a new key and salt.
    ///
    /// # Errors
    ///
    /// See [`KeySession::rekey`].
    pub fn rekey(&mut self, key: impl Into<KeyMaterial>) -> CoreResult<()> {
        self.session.rekey(&mut self.pager, &key.into())
    }

    /// Session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Path of the database file, `None` when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Configuration the handle was opened with.
    #[must_use]
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Cipher parameters in effect.
    #[must_use]
    pub fn params(&self) -> &CipherParams {
        self.session.params()
    }

    /// Bytes per page above the codec, reserve excluded.
    #[must_use]
    pub fn usable_size(&self) -> usize {
        self.session.params().usable_size()
    }

    /// Bytes of data a given page holds. Page 1 gives up the header.
    #[must_use]
    pub fn page_capacity(&self, pgno: PageNumber) -> usize {
        if pgno.is_first() {
            self.usable_size() - HEADER_SIZE
        } else {
            self.usable_size()
        }
    }

    /// Number of pages, including page 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn page_count(&self) -> CoreResult<u32> {
        self.pager.page_count()
    }

    /// Reads the data of a page.
    ///
    /// # Errors
    ///
    /// `Integrity` if the page fails to verify, `PageOutOfRange`, or a
    /// session error before the key is set.
    pub fn read_page(&self, pgno: PageNumber) -> CoreResult<Vec<u8>> {
        let codec = self.session.codec()?;
        let page = self.pager.read_page(pgno, codec)?;
        Ok(page[codec.data_range(pgno)].to_vec())
    }

    /// Writes the data of a page. `data` must be exactly
    /// [`Database::page_capacity`] bytes; writing one past the last page
    /// appends.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for a wrong-sized buffer, `PageOutOfRange`, or a
    /// session error before the key is set.
    pub fn write_page(&mut self, pgno: PageNumber, data: &[u8]) -> CoreResult<()> {
        let codec = self.session.codec()?;
        let range = codec.data_range(pgno);
        if data.len() != range.len() {
            return Err(CoreError::invalid_operation(format!(
                "{pgno} holds {} bytes of data, got {}",
                range.len(),
                data.len()
            )));
        }
        let mut page = vec![0u8; codec.page_size()];
        page[range].copy_from_slice(data);
        self.pager.write_page(pgno, &page, codec)
    }

    /// Appends a zero-filled page.
    ///
    /// # Errors
    ///
    /// A session error before the key is set, or a storage error.
    pub fn allocate_page(&mut self) -> CoreResult<PageNumber> {
        let codec = self.session.codec()?;
        self.pager.allocate_page(codec)
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if one is already open or the key is not set.
    pub fn begin(&mut self) -> CoreResult<()> {
        self.session.codec()?;
        self.pager.begin()
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` without a transaction, or the storage error that
    /// stopped the commit.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.pager.commit()
    }

    /// Discards the open transaction.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` without a transaction.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.pager.rollback()
    }

    /// Runs `f` in a transaction, committing on `Ok` and rolling back on
    /// `Err`.
    ///
    /// # Errors
    ///
    /// The closure's error, or a begin/commit failure.
    pub fn transaction<F, T>(&mut self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Self) -> CoreResult<T>,
    {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if self.pager.in_transaction() {
                    self.pager.rollback()?;
                }
                Err(e)
            }
        }
    }

    /// Reports the effective cipher settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the page count cannot be read.
    pub fn cipher_status(&self) -> CoreResult<CipherStatus> {
        Ok(CipherStatus {
            state: self.state(),
            format_version: FORMAT_VERSION,
            params: *self.params(),
            salt: self
                .session
                .header()
                .map(|header| hex::encode(header.salt.as_bytes())),
            page_count: self.page_count()?,
            usable_size: self.usable_size(),
        })
    }

    /// Verifies every page and lists the ones that fail.
    ///
    /// # Errors
    ///
    /// A session error before the key is set, or a storage error. Failed
    /// tags are reported, not returned as errors.
    pub fn integrity_check(&self) -> CoreResult<IntegrityReport> {
        let codec = self.session.codec()?;
        let mut report = IntegrityReport::default();
        for pgno in 1..=self.pager.page_count()? {
            match self.pager.read_page(PageNumber::new(pgno), codec) {
                Ok(_) => {}
                Err(e) if e.is_integrity() => report.failed_pages.push(pgno),
                Err(e) => return Err(e),
            }
            report.pages_checked += 1;
        }
        if !report.is_ok() {
            warn!(failed = ?report.failed_pages, "integrity check found damaged pages");
        }
        Ok(report)
    }

    /// Copies every page into a new database file under another key and,
    /// optionally, other cipher parameters.
    ///
    /// The target must be new and keep this database's per-page capacity,
    /// so page size and reserve size cannot change.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the target already has pages, `InvalidConfig`
    /// if its page capacity differs, plus any read or write error.
    pub fn export(
        &self,
        path: &Path,
        key: impl Into<KeyMaterial>,
        config: CodecConfig,
    ) -> CoreResult<()> {
        let mut target = Self::open(path, config)?;
        self.export_into(&mut target, key)?;
        target.close()
    }

    /// Copies every page into an empty database handle.
    ///
    /// # Errors
    ///
    /// See [`Database::export`].
    pub fn export_into(&self, target: &mut Self, key: impl Into<KeyMaterial>) -> CoreResult<()> {
        if !target.session.is_new() {
            return Err(CoreError::invalid_operation(
                "export target already contains a database",
            ));
        }
        if target.usable_size() != self.usable_size() {
            return Err(CoreError::invalid_config(format!(
                "export target holds {} bytes per page, source holds {}",
                target.usable_size(),
                self.usable_size()
            )));
        }
        target.set_key(key)?;

        let page_count = self.page_count()?;
        target.transaction(|target| {
            for pgno in 1..=page_count {
                let pgno = PageNumber::new(pgno);
                target.write_page(pgno, &self.read_page(pgno)?)?;
            }
            Ok(())
        })?;
        info!(pages = page_count, "exported database");
        Ok(())
    }

    /// Closes the handle. Any open transaction is discarded and the key is
    /// zeroized.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend fails to flush.
    pub fn close(&mut self) -> CoreResult<()> {
        if self.session.state() == SessionState::Closed {
            return Ok(());
        }
        let flushed = self.pager.close();
        self.session.close();
        debug!("closed database");
        flushed
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Reads the header of an existing file, or `None` for an empty one.
fn read_header(db: &dyn StorageBackend) -> CoreResult<Option<CodecHeader>> {
    let size = db.size()?;
    if size == 0 {
        return Ok(None);
    }
    if size < HEADER_SIZE as u64 {
        return Err(CoreError::unsupported_format(format!(
            "file of {size} bytes is too short for a header"
        )));
    }
    let bytes = db.read_at(0, HEADER_SIZE)?;
    CodecHeader::decode(&bytes).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> CodecConfig {
        CodecConfig::new().page_size(1024).kdf_iterations(2)
    }

    fn fill(db: &Database, pgno: u32, byte: u8) -> Vec<u8> {
        vec![byte; db.page_capacity(PageNumber::new(pgno))]
    }

    #[test]
    fn in_memory_round_trip() {
        let mut db = Database::open_in_memory(config()).unwrap();
        db.set_key("k").unwrap();
        assert_eq!(db.page_count().unwrap(), 1);

        let pgno = db.allocate_page().unwrap();
        assert_eq!(pgno, PageNumber::new(2));
        let data = fill(&db, 2, 0x42);
        db.write_page(pgno, &data).unwrap();
        assert_eq!(db.read_page(pgno).unwrap(), data);

        let first = fill(&db, 1, 0x01);
        db.write_page(PageNumber::FIRST, &first).unwrap();
        assert_eq!(db.read_page(PageNumber::FIRST).unwrap(), first);
    }

    #[test]
    fn access_before_key_fails() {
        let mut db = Database::open_in_memory(config()).unwrap();
        assert_eq!(db.state(), SessionState::KeyPending);
        assert!(db.read_page(PageNumber::FIRST).is_err());
        assert!(db.allocate_page().is_err());
        assert!(db.begin().is_err());
    }

    #[test]
    fn wrong_sized_write_rejected() {
        let mut db = Database::open_in_memory(config()).unwrap();
        db.set_key("k").unwrap();
        assert!(matches!(
            db.write_page(PageNumber::FIRST, &[0u8; 10]),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn transaction_commits_or_rolls_back() {
        let mut db = Database::open_in_memory(config()).unwrap();
        db.set_key("k").unwrap();

        let result: CoreResult<()> = db.transaction(|db| {
            db.allocate_page()?;
            Err(CoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert_eq!(db.page_count().unwrap(), 1);

        db.transaction(|db| {
            let pgno = db.allocate_page()?;
            let data = fill(db, 2, 9);
            db.write_page(pgno, &data)
        })
        .unwrap();
        assert_eq!(db.page_count().unwrap(), 2);
    }

    #[test]
    fn file_round_trip_and_wrong_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let mut db = Database::open(&path, config()).unwrap();
            db.set_key("correct-key").unwrap();
            let pgno = db.allocate_page().unwrap();
            let data = fill(&db, 2, 0xAB);
            db.write_page(pgno, &data).unwrap();
            db.close().unwrap();
        }

        let mut db = Database::open(&path, config()).unwrap();
        db.set_key("correct-key").unwrap();
        assert_eq!(db.read_page(PageNumber::new(2)).unwrap(), fill(&db, 2, 0xAB));
        drop(db);

        let mut db = Database::open(&path, config()).unwrap();
        assert!(db.set_key("wrong-key").unwrap_err().is_integrity());
        assert!(matches!(
            db.read_page(PageNumber::new(2)),
            Err(CoreError::SessionLocked)
        ));
    }

    #[test]
    fn truncated_first_page_fails_integrity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.db");
        {
            let mut db = Database::open(&path, config()).unwrap();
            db.set_key("k").unwrap();
        }
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(600).unwrap();
        drop(file);

        let mut db = Database::open(&path, config()).unwrap();
        let err = db.set_key("k").unwrap_err();
        assert!(matches!(err, CoreError::Integrity { page: 1, .. }), "{err:?}");
        assert_eq!(db.state(), SessionState::Locked);
    }

    #[test]
    fn second_handle_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.db");
        let _first = Database::open(&path, config()).unwrap();
        assert!(matches!(
            Database::open(&path, config()),
            Err(CoreError::DatabaseLocked)
        ));
    }

    #[test]
    fn missing_file_without_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.db");
        assert!(Database::open(&path, config().create_if_missing(false)).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn header_wins_over_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.db");
        {
            let mut db = Database::open(&path, config()).unwrap();
            db.set_key("k").unwrap();
        }

        let db = Database::open(&path, config().page_size(4096)).unwrap();
        assert_eq!(db.params().page_size, 1024);
    }

    #[test]
    fn garbage_file_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.db");
        std::fs::write(&path, vec![0x20u8; 2048]).unwrap();
        assert!(matches!(
            Database::open(&path, config()),
            Err(CoreError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn cipher_status_reports_params() {
        let mut db = Database::open_in_memory(config()).unwrap();
        let pending = db.cipher_status().unwrap();
        assert_eq!(pending.state, SessionState::KeyPending);
        assert!(pending.salt.is_none());

        db.set_key("k").unwrap();
        let status = db.cipher_status().unwrap();
        assert_eq!(status.state, SessionState::Unlocked);
        assert_eq!(status.params.page_size, 1024);
        assert_eq!(status.salt.unwrap().len(), 32);
        assert_eq!(status.usable_size, 1024 - 64);
    }

    #[test]
    fn close_is_idempotent() {
        let mut db = Database::open_in_memory(config()).unwrap();
        db.set_key("k").unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert_eq!(db.state(), SessionState::Closed);
        assert!(db.read_page(PageNumber::FIRST).is_err());
    }

    #[test]
    fn journal_path_appends_suffix() {
        assert_eq!(
            journal_path(Path::new("/tmp/app.db")),
            PathBuf::from("/tmp/app.db-journal")
        );
    }
}
