//! # PageVault Testkit
//!
//! Test utilities for PageVault.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//! - Crash injection backends for journal and rekey recovery tests
//! - Codec test vectors for checking the on-disk page format
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagevault_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         let pgno = db.allocate_page().unwrap();
//!         db.write_page(pgno, &pattern_page(pgno, 1, db.page_capacity(pgno))).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::vectors::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use vectors::*;
