//! Error types for PageVault core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in PageVault core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error, I/O failures included.
    #[error("storage error: {0}")]
    Storage(#[from] pagevault_storage::StorageError),

    /// Key material or salt is malformed.
    #[error("key derivation failed: {message}")]
    KeyDerivation {
        /// Description of the failure.
        message: String,
    },

    /// A page failed authentication.
    #[error("page {page} failed authentication: file is corrupted or key is wrong")]
    Integrity {
        /// The page that failed.
        page: u32,
    },

    /// The file declares a format or algorithm this build does not implement.
    #[error("unsupported format: {message}")]
    UnsupportedFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Invalid codec configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A previous key check failed; the handle must be reopened.
    #[error("database is locked after a failed key check; close and reopen it")]
    SessionLocked,

    /// Database is already open in another handle.
    #[error("database locked: another handle has exclusive access")]
    DatabaseLocked,

    /// Page number outside the database.
    #[error("page {page} out of range (database has {page_count} pages)")]
    PageOutOfRange {
        /// The requested page.
        page: u32,
        /// Number of pages in the database.
        page_count: u32,
    },

    /// The rollback journal cannot be parsed.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// No database attached under this alias.
    #[error("no such database: {alias}")]
    UnknownDatabase {
        /// The alias requested.
        alias: String,
    },

    /// Alias already in use on this connection.
    #[error("database {alias} is already in use")]
    AliasInUse {
        /// The alias requested.
        alias: String,
    },
}

impl CoreError {
    /// Creates a key derivation error.
    pub fn key_derivation(message: impl Into<String>) -> Self {
        Self::KeyDerivation {
            message: message.into(),
        }
    }

    /// Creates an integrity error for a page.
    pub fn integrity(page: u32) -> Self {
        Self::Integrity { page }
    }

    /// Creates an unsupported format error.
    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates a page out of range error.
    pub fn page_out_of_range(page: u32, page_count: u32) -> Self {
        Self::PageOutOfRange { page, page_count }
    }

    /// Returns true for authentication failures.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}
