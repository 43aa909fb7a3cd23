//! Connection: a main database plus attached databases, each with its own
//! key session.
//!
//! Every database sits behind its own mutex, so at most one thread runs
//! pager operations against a given file at a time.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::CodecConfig;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::kdf::KeyMaterial;
use crate::types::PageNumber;

/// Alias of the database a connection was opened on.
pub const MAIN_ALIAS: &str = "main";

/// Reserved alias that can never be attached.
pub const TEMP_ALIAS: &str = "temp";

/// A main database and any number of attached databases.
pub struct Connection {
    config: CodecConfig,
    main: Mutex<Database>,
    attached: HashMap<String, Mutex<Database>>,
}

impl Connection {
    /// Opens a connection on a database file.
    ///
    /// # Errors
    ///
    /// See [`Database::open`].
    pub fn open(path: &Path, config: CodecConfig) -> CoreResult<Self> {
        let main = Database::open(path, config.clone())?;
        Ok(Self::with_main(main, config))
    }

    /// Opens a connection on a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// See [`Database::open_in_memory`].
    pub fn open_in_memory(config: CodecConfig) -> CoreResult<Self> {
        let main = Database::open_in_memory(config.clone())?;
        Ok(Self::with_main(main, config))
    }

    /// Wraps an already-open main database.
    #[must_use]
    pub fn with_main(main: Database, config: CodecConfig) -> Self {
        Self {
            config,
            main: Mutex::new(main),
            attached: HashMap::new(),
        }
    }

    /// Sets the main database's key.
    ///
    /// # Errors
    ///
    /// See [`Database::set_key`].
    pub fn set_key(&self, key: impl Into<KeyMaterial>) -> CoreResult<()> {
        self.main.lock().set_key(key)
    }

    /// Rekeys the main database.
    ///
    /// # Errors
    ///
    /// See [`Database::rekey`].
    pub fn rekey(&self, key: impl Into<KeyMaterial>) -> CoreResult<()> {
        self.main.lock().rekey(key)
    }

    /// Opens `path` and attaches it as `alias`, keyed independently of the
    /// main database.
    ///
    /// If the file cannot be opened or the key does not verify, nothing is
    /// attached and the connection is unchanged.
    ///
    /// # Errors
    ///
    /// `AliasInUse` for a taken or reserved alias, plus any open or
    /// `set_key` error.
    pub fn attach(
        &mut self,
        path: &Path,
        alias: &str,
        key: impl Into<KeyMaterial>,
    ) -> CoreResult<()> {
        self.check_alias(alias)?;
        let db = Database::open(path, self.config.clone())?;
        self.attach_database(alias, db, key)
    }

    /// Attaches an already-open database as `alias` after setting its key.
    ///
    /// # Errors
    ///
    /// See [`Connection::attach`].
    pub fn attach_database(
        &mut self,
        alias: &str,
        mut db: Database,
        key: impl Into<KeyMaterial>,
    ) -> CoreResult<()> {
        self.check_alias(alias)?;
        if let Err(e) = db.set_key(key) {
            warn!(alias, error = %e, "attach failed");
            return Err(e);
        }
        self.attached.insert(alias.to_string(), Mutex::new(db));
        debug!(alias, "attached database");
        Ok(())
    }

    fn check_alias(&self, alias: &str) -> CoreResult<()> {
        if alias.is_empty() {
            return Err(CoreError::invalid_operation("alias must not be empty"));
        }
        let taken = alias.eq_ignore_ascii_case(MAIN_ALIAS)
            || alias.eq_ignore_ascii_case(TEMP_ALIAS)
            || self.attached.contains_key(alias);
        if taken {
            return Err(CoreError::AliasInUse {
                alias: alias.to_string(),
            });
        }
        Ok(())
    }

    /// Closes and removes an attached database.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for the main database, `UnknownDatabase` for an
    /// alias that is not attached.
    pub fn detach(&mut self, alias: &str) -> CoreResult<()> {
        if alias.eq_ignore_ascii_case(MAIN_ALIAS) {
            return Err(CoreError::invalid_operation(
                "cannot detach the main database",
            ));
        }
        let db = self
            .attached
            .remove(alias)
            .ok_or_else(|| CoreError::UnknownDatabase {
                alias: alias.to_string(),
            })?;
        db.into_inner().close()?;
        debug!(alias, "detached database");
        Ok(())
    }

    /// Runs `f` with exclusive access to the database named `alias`.
    ///
    /// # Errors
    ///
    /// `UnknownDatabase` for an alias that is not attached, or the
    /// closure's error.
    pub fn with_database<T>(
        &self,
        alias: &str,
        f: impl FnOnce(&mut Database) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let db = if alias.eq_ignore_ascii_case(MAIN_ALIAS) {
            &self.main
        } else {
            self.attached
                .get(alias)
                .ok_or_else(|| CoreError::UnknownDatabase {
                    alias: alias.to_string(),
                })?
        };
        f(&mut db.lock())
    }

    /// Reads the data of a page in the database named `alias`.
    ///
    /// # Errors
    ///
    /// See [`Connection::with_database`] and [`Database::read_page`].
    pub fn read_page(&self, alias: &str, pgno: PageNumber) -> CoreResult<Vec<u8>> {
        self.with_database(alias, |db| db.read_page(pgno))
    }

    /// Writes the data of a page in the database named `alias`.
    ///
    /// # Errors
    ///
    /// See [`Connection::with_database`] and [`Database::write_page`].
    pub fn write_page(&self, alias: &str, pgno: PageNumber, data: &[u8]) -> CoreResult<()> {
        self.with_database(alias, |db| db.write_page(pgno, data))
    }

    /// Names of all databases on the connection, `main` first.
    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        let mut attached: Vec<String> = self.attached.keys().cloned().collect();
        attached.sort();
        std::iter::once(MAIN_ALIAS.to_string())
            .chain(attached)
            .collect()
    }

    /// Closes every attached database, then the main one.
    ///
    /// # Errors
    ///
    /// Returns the first close error; every database is closed regardless.
    pub fn close(self) -> CoreResult<()> {
        let mut first_error = None;
        for (alias, db) in self.attached {
            if let Err(e) = db.into_inner().close() {
                warn!(alias = %alias, error = %e, "failed to close attached database");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.main.into_inner().close() {
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("aliases", &self.aliases())
            .finish_non_exhaustive()
    }
}
