//! # PageVault Core
//!
//! Transparent page-level encryption for page-oriented database files.
//!
//! This crate provides:
//! - Key derivation from passphrases or raw keys ([`kdf`])
//! - AES-256 page cipher in CBC or CTR mode ([`cipher`])
//! - HMAC page authenticator bound to the page number ([`auth`])
//! - The codec hook between pager and storage ([`codec`])
//! - A pager with a rollback journal ([`pager`], [`journal`])
//! - Per-database key sessions with rekey ([`session`])
//! - [`Database`] and [`Connection`] handles, with attached databases
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use pagevault_core::{CodecConfig, Database, PageNumber};
//!
//! let mut db = Database::open_in_memory(CodecConfig::default())?;
//! db.set_key("correct horse battery staple")?;
//! let pgno = db.allocate_page()?;
//! db.write_page(pgno, &vec![1u8; db.page_capacity(pgno)])?;
//! assert_eq!(db.read_page(pgno)?[0], 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cipher;
pub mod codec;
mod config;
mod connection;
mod database;
mod error;
pub mod header;
pub mod journal;
pub mod kdf;
pub mod pager;
pub mod params;
pub mod session;
mod types;

pub use codec::{CipherCodec, PageCodec};
pub use config::CodecConfig;
pub use connection::{Connection, MAIN_ALIAS, TEMP_ALIAS};
pub use database::{journal_path, CipherStatus, Database, IntegrityReport};
pub use error::{CoreError, CoreResult};
pub use header::{CodecHeader, HEADER_SIZE};
pub use kdf::{DatabaseKey, KeyMaterial, Salt};
pub use params::{CipherAlgorithm, CipherParams, HmacAlgorithm, IvRule, KdfAlgorithm};
pub use session::SessionState;
pub use types::PageNumber;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
