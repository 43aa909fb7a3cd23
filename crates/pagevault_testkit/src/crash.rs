//! Crash injection for PageVault.
//!
//! A [`CrashStore`] holds a database image and its rollback journal in
//! memory. Databases opened on it write through [`CrashableBackend`]s that
//! share one byte budget: once the budget runs out, the write in progress
//! is torn (only a prefix lands) and every later mutation fails, as if the
//! process had died at that byte.
//!
//! After a crash, [`CrashStore::reopen`] opens a fresh database on the bytes
//! that reached "disk", which is where journal recovery has to prove itself.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagevault_testkit::crash::CrashStore;
//!
//! let store = CrashStore::new();
//! let trace = store.measure(config, "key", |db| db.rekey("new"))?;
//! for budget in trace.crash_points(8) {
//!     store.crash_after(budget);
//!     // run the operation, then store.reopen(..) and check the outcome
//! }
//! ```

use pagevault_core::{CodecConfig, CoreResult, Database};
use pagevault_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    write_ends: Mutex<Vec<usize>>,
}

/// Shared crash trigger for a group of backends.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<CrashState>,
}

enum Charge {
    Full,
    Partial(usize),
}

impl CrashSwitch {
    /// Creates a switch with an unlimited budget.
    pub fn new() -> Self {
        Self {
            state: Arc::new(CrashState {
                crash_after_bytes: AtomicUsize::new(usize::MAX),
                bytes_written: AtomicUsize::new(0),
                crashed: AtomicBool::new(false),
                write_ends: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Arms the switch to crash once `bytes` more bytes have been written.
    pub fn crash_after(&self, bytes: usize) {
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.write_ends.lock().clear();
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Removes the budget and clears the crash state.
    pub fn disarm(&self) {
        self.crash_after(usize::MAX);
    }

    /// Bytes written since the switch was last armed.
    pub fn bytes_written(&self) -> usize {
        self.state.bytes_written.load(Ordering::SeqCst)
    }

    /// Byte count at the end of every completed write since the switch was
    /// last armed.
    pub fn write_ends(&self) -> Vec<usize> {
        self.state.write_ends.lock().clone()
    }

    /// Returns whether the simulated crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    fn charge(&self, len: usize) -> Charge {
        let before = self.state.bytes_written.fetch_add(len, Ordering::SeqCst);
        let budget = self.state.crash_after_bytes.load(Ordering::SeqCst);
        let end = before.saturating_add(len);
        if end <= budget {
            self.state.write_ends.lock().push(end);
            return Charge::Full;
        }
        self.state.crashed.store(true, Ordering::SeqCst);
        Charge::Partial(budget.saturating_sub(before))
    }
}

impl Default for CrashSwitch {
    fn default() -> Self {
        Self::new()
    }
}

fn crash_error(during: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("simulated crash during {during}"),
    ))
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: InMemoryBackend,
    switch: CrashSwitch,
}

impl CrashableBackend {
    /// Wraps `inner`, charging its writes to `switch`.
    pub fn new(inner: InMemoryBackend, switch: CrashSwitch) -> Self {
        Self { inner, switch }
    }

    fn check_alive(&self, during: &str) -> StorageResult<()> {
        if self.switch.has_crashed() {
            return Err(crash_error(during));
        }
        Ok(())
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.check_alive("write")?;
        match self.switch.charge(data.len()) {
            Charge::Full => self.inner.write_at(offset, data),
            Charge::Partial(landed) => {
                if landed > 0 {
                    let _ = self.inner.write_at(offset, &data[..landed]);
                }
                Err(crash_error("partial write"))
            }
        }
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_alive("flush")?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_alive("sync")?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive("truncate")?;
        self.inner.truncate(new_size)
    }
}

/// An in-memory database file and journal with a shared crash switch.
#[derive(Debug, Clone, Default)]
pub struct CrashStore {
    db: InMemoryBackend,
    journal: InMemoryBackend,
    switch: CrashSwitch,
}

impl CrashStore {
    /// Creates an empty store with an unlimited budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// The crash switch shared by every backend of this store.
    pub fn switch(&self) -> &CrashSwitch {
        &self.switch
    }

    /// Arms the switch. See [`CrashSwitch::crash_after`].
    pub fn crash_after(&self, bytes: usize) {
        self.switch.crash_after(bytes);
    }

    /// Opens a database whose writes are charged to the switch.
    pub fn open(&self, config: CodecConfig) -> CoreResult<Database> {
        Database::open_with_backends(
            config,
            Box::new(CrashableBackend::new(self.db.clone(), self.switch.clone())),
            Box::new(CrashableBackend::new(
                self.journal.clone(),
                self.switch.clone(),
            )),
        )
    }

    /// Opens a database on a copy of the bytes currently on "disk", as a
    /// restarted process would. The store itself is left untouched.
    pub fn reopen(&self, config: CodecConfig) -> CoreResult<Database> {
        Database::open_with_backends(
            config,
            Box::new(InMemoryBackend::with_data(self.db.data())),
            Box::new(InMemoryBackend::with_data(self.journal.data())),
        )
    }

    /// Copies the database and journal bytes.
    pub fn snapshot(&self) -> (Vec<u8>, Vec<u8>) {
        (self.db.data(), self.journal.data())
    }

    /// Replaces the database and journal bytes.
    pub fn restore(&self, snapshot: &(Vec<u8>, Vec<u8>)) {
        replace(&self.db, &snapshot.0);
        replace(&self.journal, &snapshot.1);
    }

    /// Runs `op` on a database opened with `config` and `key`, without a
    /// crash, and traces the bytes it wrote. The store is restored
    /// afterwards.
    pub fn measure<F>(&self, config: CodecConfig, key: &str, op: F) -> CoreResult<WriteTrace>
    where
        F: FnOnce(&mut Database) -> CoreResult<()>,
    {
        let saved = self.snapshot();
        self.switch.disarm();
        let mut db = self.open(config)?;
        db.set_key(key)?;
        self.switch.disarm();
        let result = op(&mut db);
        let trace = WriteTrace {
            total: self.switch.bytes_written(),
            write_ends: self.switch.write_ends(),
        };
        drop(db);
        self.restore(&saved);
        result.map(|()| trace)
    }
}

/// Writes made by one measured operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTrace {
    /// Bytes written in total.
    pub total: usize,
    /// Running byte count at the end of each write.
    pub write_ends: Vec<usize>,
}

impl WriteTrace {
    /// Crash budgets covering every `step` bytes plus the byte before, at
    /// and after every write boundary, so each write is crashed before it
    /// starts, one byte in and exactly at its end.
    pub fn crash_points(&self, step: usize) -> Vec<usize> {
        let mut points: BTreeSet<usize> = crash_points(self.total, step).into_iter().collect();
        for &end in &self.write_ends {
            points.extend([end.saturating_sub(1), end, end + 1]);
        }
        points.into_iter().filter(|&p| p <= self.total).collect()
    }
}

fn replace(backend: &InMemoryBackend, bytes: &[u8]) {
    let mut backend = backend.clone();
    backend.clear();
    if !bytes.is_empty() {
        let _ = backend.write_at(0, bytes);
    }
}

/// Crash budgets from 0 to `total` inclusive in steps of `step`. The last
/// point always equals `total`, where the operation completes.
pub fn crash_points(total: usize, step: usize) -> Vec<usize> {
    let mut points: Vec<usize> = (0..total).step_by(step.max(1)).collect();
    points.push(total);
    points
}

/// Result of one crash point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashOutcome {
    /// The database reopened in its state before the operation.
    RolledBack,
    /// The database reopened with the operation fully applied.
    Applied,
}
