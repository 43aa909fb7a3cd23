//! # PageVault Storage
//!
//! Byte-addressed storage backends for the PageVault pager.
//!
//! Backends are **opaque byte stores**: they never interpret what they hold.
//! The pager above them owns page layout, the rollback journal format and the
//! page codec. A backend only has to move bytes to and from offsets exactly.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, write, append, flush, truncate)
//! - No knowledge of pages, headers, journals or encryption
//! - Must be `Send + Sync` so a connection can be shared between threads
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral databases
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use pagevault_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(0, b"hello world").unwrap();
//! let data = backend.read_at(6, 5).unwrap();
//! assert_eq!(&data, b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
