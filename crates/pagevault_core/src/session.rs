//! Key/session state machine for one database file.
//!
//! ```text
//! Closed ──open──▶ KeyPending ──set_key ok──▶ Unlocked ◀──▶ Rekeying
//!                      │                         │
//!                      └──page 1 fails──▶ Locked ◀┘ (rekey rollback failed)
//! ```
//!
//! The session owns the active codec and therefore the only copy of the
//! derived key. Dropping the codec zeroizes the key.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::{CipherCodec, PageCodec};
use crate::error::{CoreError, CoreResult};
use crate::header::CodecHeader;
use crate::kdf::{KeyMaterial, Salt};
use crate::pager::Pager;
use crate::params::CipherParams;
use crate::types::PageNumber;

/// Lifecycle state of a key session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// The handle is closed; no key material is held.
    Closed,
    /// The file is open and waiting for key material.
    KeyPending,
    /// The key verified against page 1; pages can be read and written.
    Unlocked,
    /// Page 1 failed to verify. Close and reopen the handle to retry.
    Locked,
    /// A rekey is rewriting every page.
    Rekeying,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::KeyPending => "key-pending",
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
            Self::Rekeying => "rekeying",
        })
    }
}

/// Active key material and cipher configuration for one database.
pub struct KeySession {
    state: SessionState,
    /// Header read from the file; `None` until a new file is keyed.
    header: Option<CodecHeader>,
    /// Parameters the file has, or will be created with.
    params: CipherParams,
    codec: Option<CipherCodec>,
}

impl KeySession {
    /// Opens a session for a file whose header was `header`, or for a new
    /// file that will be created with `params`.
    #[must_use]
    pub fn open(header: Option<CodecHeader>, params: CipherParams) -> Self {
        let params = header.map_or(params, |h| h.params);
        Self {
            state: SessionState::KeyPending,
            header,
            params,
            codec: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Cipher parameters in effect.
    #[must_use]
    pub const fn params(&self) -> &CipherParams {
        &self.params
    }

    /// The persisted header, once the file has one.
    #[must_use]
    pub const fn header(&self) -> Option<&CodecHeader> {
        self.header.as_ref()
    }

    /// Returns true while the file has no header yet.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.header.is_none()
    }

    /// The active codec.
    ///
    /// # Errors
    ///
    /// Returns `SessionLocked` after a failed key check and
    /// `InvalidOperation` before a key is set or after close.
    pub fn codec(&self) -> CoreResult<&CipherCodec> {
        match (self.state, &self.codec) {
            (SessionState::Unlocked | SessionState::Rekeying, Some(codec)) => Ok(codec),
            (SessionState::Locked, _) => Err(CoreError::SessionLocked),
            (SessionState::Closed, _) => Err(CoreError::invalid_operation("database is closed")),
            _ => Err(CoreError::invalid_operation(
                "no key set: call set_key before accessing pages",
            )),
        }
    }

    /// Supplies key material and verifies it against page 1.
    ///
    /// For a new file, page 1 is created with a fresh salt and committed.
    /// A key derivation error leaves the session waiting for a key; a page 1
    /// authentication failure locks it.
    ///
    /// # Errors
    ///
    /// `KeyDerivation` for malformed material, `Integrity` for a wrong key
    /// or corrupted page 1, `SessionLocked` if already locked.
    pub fn set_key(&mut self, pager: &mut Pager, material: &KeyMaterial) -> CoreResult<()> {
        match self.state {
            SessionState::KeyPending => {}
            SessionState::Locked => return Err(CoreError::SessionLocked),
            SessionState::Closed => {
                return Err(CoreError::invalid_operation("database is closed"));
            }
            SessionState::Unlocked | SessionState::Rekeying => {
                return Err(CoreError::invalid_operation(
                    "key already set: use rekey to change it",
                ));
            }
        }

        match self.header {
            Some(header) => {
                let codec = CipherCodec::derive(header, material)?;
                // A header without a whole first page is a torn or truncated file.
                let verified = if pager.page_count()? == 0 {
                    Err(CoreError::integrity(PageNumber::FIRST.as_u32()))
                } else {
                    pager.read_page(PageNumber::FIRST, &codec).map(|_| ())
                };
                match verified {
                    Ok(()) => {}
                    Err(e) if e.is_integrity() => {
                        warn!("page 1 failed authentication; session locked");
                        self.state = SessionState::Locked;
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                }
                self.codec = Some(codec);
            }
            None => {
                let header = CodecHeader::new(self.params, Salt::generate());
                let codec = CipherCodec::derive(header, material)?;
                let first_page = vec![0u8; codec.page_size()];
                pager.write_page(PageNumber::FIRST, &first_page, &codec)?;
                debug!(page_size = codec.page_size(), "created database header");
                self.header = Some(header);
                self.codec = Some(codec);
            }
        }

        self.state = SessionState::Unlocked;
        debug!(cipher = %self.params.cipher, hmac = %self.params.hmac, "database unlocked");
        Ok(())
    }

    /// Re-encrypts every page under a key derived from `material` and a new
    /// salt, as one journaled transaction.
    ///
    /// On failure the transaction is rolled back and the old key stays in
    /// effect. If the rollback cannot be confirmed the session is locked.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` unless unlocked with no open transaction, plus
    /// any key derivation, codec or storage error from the rewrite.
    pub fn rekey(&mut self, pager: &mut Pager, material: &KeyMaterial) -> CoreResult<()> {
        let old_header = match (self.state, self.header) {
            (SessionState::Unlocked, Some(header)) => header,
            (SessionState::Locked, _) => return Err(CoreError::SessionLocked),
            _ => return Err(CoreError::invalid_operation("rekey requires an unlocked database")),
        };
        if pager.in_transaction() {
            return Err(CoreError::invalid_operation(
                "rekey cannot run inside an open transaction",
            ));
        }

        let new_header = CodecHeader::new(old_header.params, Salt::generate());
        let new_codec = CipherCodec::derive(new_header, material)?;

        self.state = SessionState::Rekeying;
        let result = self.rewrite_all(pager, &new_codec);

        match result {
            Ok(pages) => {
                // Replacing the codec drops, and so zeroizes, the old key.
                self.codec = Some(new_codec);
                self.header = Some(new_header);
                self.state = SessionState::Unlocked;
                info!(pages, "rekeyed database");
                Ok(())
            }
            Err(e) => {
                if pager.in_transaction() {
                    pager.rollback()?;
                }
                self.state = if pager.has_hot_journal().unwrap_or(true) {
                    warn!(error = %e, "rekey failed and could not be rolled back; session locked");
                    SessionState::Locked
                } else {
                    warn!(error = %e, "rekey failed; old key still active");
                    SessionState::Unlocked
                };
                Err(e)
            }
        }
    }

    fn rewrite_all(&self, pager: &mut Pager, new_codec: &CipherCodec) -> CoreResult<u32> {
        let old_codec = self.codec.as_ref().ok_or(CoreError::SessionLocked)?;
        pager.begin()?;
        let page_count = pager.page_count()?;
        for pgno in 1..=page_count {
            let pgno = PageNumber::new(pgno);
            let page = pager.read_page(pgno, old_codec)?;
            pager.write_page(pgno, &page, new_codec)?;
        }
        pager.commit()?;
        Ok(page_count)
    }

    /// Drops the codec, zeroizing the key, and moves to `Closed`.
    pub fn close(&mut self) {
        self.codec = None;
        self.state = SessionState::Closed;
    }
}

impl fmt::Debug for KeySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySession")
            .field("state", &self.state)
            .field("params", &self.params)
            .field("has_key", &self.codec.is_some())
            .finish()
    }
}
