//! Core type definitions for PageVault.

use std::fmt;

/// A 1-based page number.
///
/// Page 1 holds the cleartext codec header; pages are laid out contiguously
/// so page `n` starts at byte `(n - 1) * page_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNumber(pub u32);

impl PageNumber {
    /// The first page of every database.
    pub const FIRST: Self = Self(1);

    /// Creates a new page number.
    #[must_use]
    pub const fn new(pgno: u32) -> Self {
        Self(pgno)
    }

    /// Returns the raw page number.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true for page 1.
    #[must_use]
    pub const fn is_first(self) -> bool {
        self.0 == 1
    }

    /// Byte offset of this page within the database file.
    #[must_use]
    pub const fn offset(self, page_size: usize) -> u64 {
        (self.0 as u64 - 1) * page_size as u64
    }

    /// Big-endian encoding, as bound into IVs and tags.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

impl From<u32> for PageNumber {
    fn from(pgno: u32) -> Self {
        Self(pgno)
    }
}
