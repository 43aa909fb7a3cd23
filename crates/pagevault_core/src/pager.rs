//! Pager: page-numbered I/O with journaled transactions.
//!
//! Page `n` lives at byte `(n - 1) * page_size` of the database backend.
//! Writes are passed through the caller's codec immediately and cached in
//! their protected form; nothing reaches the database backend until commit.
//!
//! ## Commit protocol
//!
//! 1. Write pre-images of overwritten pages to the journal, sync it.
//! 2. Write dirty pages to the database, sync it.
//! 3. Truncate the journal to zero. This is the commit point.
//!
//! A crash before step 3 leaves a hot journal that the next open replays.

use std::collections::BTreeMap;

use crate::codec::PageCodec;
use crate::error::{CoreError, CoreResult};
use crate::journal::{self, Journal};
use crate::types::PageNumber;
use pagevault_storage::StorageBackend;
use tracing::{debug, warn};

/// An open write transaction.
#[derive(Debug)]
struct PagerTransaction {
    /// Page count when the transaction began.
    original_page_count: u32,
    /// Page count including pages appended in this transaction.
    page_count: u32,
    /// Encoded pages waiting for commit.
    dirty: BTreeMap<u32, Vec<u8>>,
}

/// Page-level I/O over a database backend and its journal backend.
pub struct Pager {
    db: Box<dyn StorageBackend>,
    journal: Box<dyn StorageBackend>,
    page_size: usize,
    sync_on_commit: bool,
    txn: Option<PagerTransaction>,
}

impl Pager {
    /// Creates a pager. Call [`journal::recover`] on the backends first.
    #[must_use]
    pub fn new(
        db: Box<dyn StorageBackend>,
        journal: Box<dyn StorageBackend>,
        page_size: usize,
        sync_on_commit: bool,
    ) -> Self {
        Self {
            db,
            journal,
            page_size,
            sync_on_commit,
            txn: None,
        }
    }

    /// Page size in bytes.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns true while a transaction is open.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Number of pages, including pages appended by the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn page_count(&self) -> CoreResult<u32> {
        match &self.txn {
            Some(txn) => Ok(txn.page_count),
            None => self.disk_page_count(),
        }
    }

    /// Returns true if the journal holds a complete commit that was neither
    /// finished nor undone.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read.
    pub fn has_hot_journal(&self) -> CoreResult<bool> {
        let size = self.journal.size()?;
        if size == 0 {
            return Ok(false);
        }
        let len = usize::try_from(size)
            .map_err(|_| CoreError::journal_corruption("journal too large to read"))?;
        let data = self.journal.read_at(0, len)?;
        Ok(Journal::decode(&data).is_ok())
    }

    fn disk_page_count(&self) -> CoreResult<u32> {
        let pages = self.db.size()? / self.page_size as u64;
        u32::try_from(pages).map_err(|_| CoreError::invalid_operation("database too large"))
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a transaction is already open.
    pub fn begin(&mut self) -> CoreResult<()> {
        if self.txn.is_some() {
            return Err(CoreError::invalid_operation("transaction already active"));
        }
        let page_count = self.disk_page_count()?;
        self.txn = Some(PagerTransaction {
            original_page_count: page_count,
            page_count,
            dirty: BTreeMap::new(),
        });
        Ok(())
    }

    /// Discards the open transaction. The database file is untouched.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no transaction is open.
    pub fn rollback(&mut self) -> CoreResult<()> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| CoreError::invalid_operation("no active transaction"))?;
        debug!(dirty = txn.dirty.len(), "rolled back transaction");
        Ok(())
    }

    /// Commits the open transaction.
    ///
    /// On failure the transaction is gone and, where possible, the database
    /// has been restored from the journal. If that restore also fails, the
    /// hot journal is left for the next open to replay.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no transaction is open, or the storage
    /// error that stopped the commit.
    pub fn commit(&mut self) -> CoreResult<()> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| CoreError::invalid_operation("no active transaction"))?;
        if txn.dirty.is_empty() {
            return Ok(());
        }

        let mut pre_images = Journal::new(self.page_size_u32()?, txn.original_page_count);
        for &pgno in txn.dirty.keys() {
            if pgno <= txn.original_page_count {
                pre_images.push(PageNumber::new(pgno), self.read_disk(PageNumber::new(pgno))?);
            }
        }
        let journal_bytes = pre_images.encode()?;

        self.journal.truncate(0)?;
        self.journal.write_at(0, &journal_bytes)?;
        self.durable(true)?;

        if let Err(e) = self.write_dirty(&txn) {
            warn!(error = %e, "commit failed after journaling, restoring");
            if let Err(restore) = journal::recover(self.db.as_mut(), self.journal.as_mut()) {
                warn!(error = %restore, "restore failed, journal left for next open");
            }
            return Err(e);
        }

        self.journal.truncate(0)?;
        self.durable(true)?;

        debug!(
            pages = txn.dirty.len(),
            journaled = pre_images.records.len(),
            page_count = txn.page_count,
            "committed transaction"
        );
        Ok(())
    }

    fn write_dirty(&mut self, txn: &PagerTransaction) -> CoreResult<()> {
        // BTreeMap order writes appended pages contiguously.
        for (&pgno, raw) in &txn.dirty {
            self.db
                .write_at(PageNumber::new(pgno).offset(self.page_size), raw)?;
        }
        self.durable(false)
    }

    /// Syncs (or just flushes) the journal or the database.
    fn durable(&mut self, journal: bool) -> CoreResult<()> {
        let backend = if journal {
            self.journal.as_mut()
        } else {
            self.db.as_mut()
        };
        if self.sync_on_commit {
            backend.sync()?;
        } else {
            backend.flush()?;
        }
        Ok(())
    }

    fn page_size_u32(&self) -> CoreResult<u32> {
        u32::try_from(self.page_size).map_err(|_| CoreError::invalid_config("page size too large"))
    }

    fn check_range(&self, pgno: PageNumber, allow_append: bool) -> CoreResult<()> {
        let page_count = self.page_count()?;
        let limit = if allow_append { page_count + 1 } else { page_count };
        if pgno.as_u32() == 0 || pgno.as_u32() > limit {
            return Err(CoreError::page_out_of_range(pgno.as_u32(), page_count));
        }
        Ok(())
    }

    fn read_disk(&self, pgno: PageNumber) -> CoreResult<Vec<u8>> {
        Ok(self.db.read_at(pgno.offset(self.page_size), self.page_size)?)
    }

    /// Reads the protected bytes of a page, as of the open transaction.
    ///
    /// # Errors
    ///
    /// Returns `PageOutOfRange` for a page past the end.
    pub fn read_raw(&self, pgno: PageNumber) -> CoreResult<Vec<u8>> {
        self.check_range(pgno, false)?;
        if let Some(raw) = self.txn.as_ref().and_then(|t| t.dirty.get(&pgno.as_u32())) {
            return Ok(raw.clone());
        }
        self.read_disk(pgno)
    }

    /// Stages the protected bytes of a page in the open transaction.
    ///
    /// `pgno` may be one past the last page, which appends a page.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` without a transaction or for a wrong-sized
    /// page, and `PageOutOfRange` for a page that would leave a gap.
    pub fn write_raw(&mut self, pgno: PageNumber, raw: Vec<u8>) -> CoreResult<()> {
        if raw.len() != self.page_size {
            return Err(CoreError::invalid_operation(format!(
                "{pgno}: expected {} bytes, got {}",
                self.page_size,
                raw.len()
            )));
        }
        self.check_range(pgno, true)?;
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("no active transaction"))?;
        txn.page_count = txn.page_count.max(pgno.as_u32());
        txn.dirty.insert(pgno.as_u32(), raw);
        Ok(())
    }

    /// Reads and decodes a page.
    ///
    /// # Errors
    ///
    /// Returns `PageOutOfRange`, storage errors, or the codec's error.
    pub fn read_page(&self, pgno: PageNumber, codec: &dyn PageCodec) -> CoreResult<Vec<u8>> {
        let raw = self.read_raw(pgno)?;
        codec.decode_page(pgno, &raw)
    }

    /// Encodes and writes a page. Without an open transaction the write is
    /// committed on its own.
    ///
    /// # Errors
    ///
    /// Returns the codec's error, `PageOutOfRange`, or a commit failure.
    pub fn write_page(
        &mut self,
        pgno: PageNumber,
        page: &[u8],
        codec: &dyn PageCodec,
    ) -> CoreResult<()> {
        self.autocommit(|pager| {
            let raw = codec.encode_page(pgno, page)?;
            pager.write_raw(pgno, raw)
        })
    }

    /// Appends a zero-filled page and returns its number.
    ///
    /// # Errors
    ///
    /// Same as [`Pager::write_page`].
    pub fn allocate_page(&mut self, codec: &dyn PageCodec) -> CoreResult<PageNumber> {
        self.autocommit(|pager| {
            let pgno = PageNumber::new(pager.page_count()? + 1);
            let raw = codec.encode_page(pgno, &vec![0u8; pager.page_size])?;
            pager.write_raw(pgno, raw)?;
            Ok(pgno)
        })
    }

    /// Runs `f` inside the open transaction, or inside a new one that is
    /// committed on success and rolled back on failure.
    pub(crate) fn autocommit<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> CoreResult<T>,
    ) -> CoreResult<T> {
        if self.in_transaction() {
            return f(self);
        }
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.rollback()?;
                Err(e)
            }
        }
    }

    /// Drops any open transaction and flushes both backends.
    ///
    /// # Errors
    ///
    /// Returns an error if a flush fails.
    pub fn close(&mut self) -> CoreResult<()> {
        if let Some(txn) = self.txn.take() {
            debug!(dirty = txn.dirty.len(), "discarding open transaction on close");
        }
        self.db.flush()?;
        self.journal.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("page_size", &self.page_size)
            .field("sync_on_commit", &self.sync_on_commit)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}
