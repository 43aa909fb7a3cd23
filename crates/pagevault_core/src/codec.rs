//! Codec hook between the pager and physical page I/O.
//!
//! ## Page layout
//!
//! ```text
//! page 1:  | header (48, clear) | data (encrypted) | iv? | tag | pad |
//! page n:  | data (encrypted)                     | iv? | tag | pad |
//!                                                 ^ usable_size
//! ```
//!
//! The codec works on full page images. On write it fills in the header
//! (page 1), encrypts the data range and writes IV and tag into the reserve.
//! On read it verifies the tag before anything is decrypted, so a failed
//! page never yields plaintext.

use std::ops::Range;

use crate::auth::{MacInput, PageAuthenticator};
use crate::cipher::PageCipher;
use crate::error::{CoreError, CoreResult};
use crate::header::{CodecHeader, HEADER_SIZE};
use crate::kdf::{self, DatabaseKey, KeyMaterial, Salt};
use crate::params::CipherParams;
use crate::types::PageNumber;

/// Transforms pages between their in-memory and on-disk forms.
pub trait PageCodec: Send + Sync {
    /// Produces the on-disk bytes for a page image.
    ///
    /// # Errors
    ///
    /// Fails if the image is not exactly one page or the cipher rejects it.
    fn encode_page(&self, pgno: PageNumber, page: &[u8]) -> CoreResult<Vec<u8>>;

    /// Verifies and decrypts on-disk bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Integrity`] if the page does not authenticate.
    fn decode_page(&self, pgno: PageNumber, raw: &[u8]) -> CoreResult<Vec<u8>>;

    /// Page size in bytes.
    fn page_size(&self) -> usize;

    /// Trailing bytes per page reserved by the codec.
    fn reserve_size(&self) -> usize;

    /// Byte range of a page image that belongs to the layers above.
    fn data_range(&self, pgno: PageNumber) -> Range<usize> {
        let start = if pgno.is_first() { HEADER_SIZE } else { 0 };
        start..self.page_size() - self.reserve_size()
    }
}

/// The encrypting codec: AES page cipher plus HMAC page authenticator.
pub struct CipherCodec {
    header: CodecHeader,
    header_bytes: [u8; HEADER_SIZE],
    key: DatabaseKey,
    cipher: PageCipher,
    auth: PageAuthenticator,
}

impl CipherCodec {
    /// Builds a codec from a header and an already-derived key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the header parameters are unusable.
    pub fn new(header: CodecHeader, key: DatabaseKey) -> CoreResult<Self> {
        let params = header.params;
        params.validate()?;
        Ok(Self {
            header,
            header_bytes: header.encode(),
            key,
            cipher: PageCipher::new(params.cipher, params.iv_rule),
            auth: PageAuthenticator::new(params.hmac),
        })
    }

    /// Derives the key for `header` from `material` and builds a codec.
    ///
    /// # Errors
    ///
    /// Returns `KeyDerivation` for malformed material.
    pub fn derive(header: CodecHeader, material: &KeyMaterial) -> CoreResult<Self> {
        let params = header.params;
        let key = kdf::derive(
            material,
            header.salt.as_bytes(),
            params.kdf,
            params.kdf_iterations,
        )?;
        Self::new(header, key)
    }

    /// Cipher parameters.
    #[must_use]
    pub const fn params(&self) -> &CipherParams {
        &self.header.params
    }

    /// Salt the key was derived with.
    #[must_use]
    pub const fn salt(&self) -> &Salt {
        &self.header.salt
    }

    /// The header this codec writes to page 1.
    #[must_use]
    pub const fn header(&self) -> &CodecHeader {
        &self.header
    }

    /// Usable bytes per page (everything but the reserve).
    #[must_use]
    pub const fn usable_size(&self) -> usize {
        self.header.params.usable_size()
    }

    fn check_len(&self, pgno: PageNumber, len: usize) -> CoreResult<()> {
        if len != self.page_size() {
            return Err(CoreError::invalid_operation(format!(
                "{pgno}: expected {} bytes, got {len}",
                self.page_size()
            )));
        }
        Ok(())
    }

    fn header_range(pgno: PageNumber) -> Range<usize> {
        if pgno.is_first() {
            0..HEADER_SIZE
        } else {
            0..0
        }
    }
}

impl PageCodec for CipherCodec {
    fn encode_page(&self, pgno: PageNumber, page: &[u8]) -> CoreResult<Vec<u8>> {
        self.check_len(pgno, page.len())?;
        let params = &self.header.params;
        let usable = params.usable_size();
        let iv_size = params.iv_rule.stored_iv_size();
        let data = self.data_range(pgno);

        let mut out = page.to_vec();
        if pgno.is_first() {
            out[..HEADER_SIZE].copy_from_slice(&self.header_bytes);
        }

        let iv = self.cipher.iv_for_write(pgno, self.key.enc_key());
        self.cipher
            .encrypt(&iv, &mut out[data.clone()], self.key.enc_key())?;

        out[usable..].fill(0);
        out[usable..usable + iv_size].copy_from_slice(&iv[..iv_size]);

        let tag = self.auth.tag(
            &MacInput {
                pgno,
                header: &out[Self::header_range(pgno)],
                ciphertext: &out[data],
                iv: &out[usable..usable + iv_size],
            },
            self.key.hmac_key(),
        )?;
        let tag_start = usable + iv_size;
        out[tag_start..tag_start + tag.len()].copy_from_slice(&tag);

        Ok(out)
    }

    fn decode_page(&self, pgno: PageNumber, raw: &[u8]) -> CoreResult<Vec<u8>> {
        if raw.len() != self.page_size() {
            return Err(CoreError::integrity(pgno.as_u32()));
        }
        let params = &self.header.params;
        let usable = params.usable_size();
        let iv_size = params.iv_rule.stored_iv_size();
        let tag_start = usable + iv_size;
        let data = self.data_range(pgno);
        let stored_iv = &raw[usable..tag_start];

        self.auth.verify(
            &MacInput {
                pgno,
                header: &raw[Self::header_range(pgno)],
                ciphertext: &raw[data.clone()],
                iv: stored_iv,
            },
            &raw[tag_start..tag_start + self.auth.tag_size()],
            self.key.hmac_key(),
        )?;

        let iv = self.cipher.iv_for_read(pgno, self.key.enc_key(), stored_iv)?;
        let mut out = raw.to_vec();
        self.cipher.decrypt(&iv, &mut out[data], self.key.enc_key())?;
        out[usable..].fill(0);
        Ok(out)
    }

    fn page_size(&self) -> usize {
        self.header.params.page_size()
    }

    fn reserve_size(&self) -> usize {
        self.header.params.reserve_size()
    }
}

impl std::fmt::Debug for CipherCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherCodec")
            .field("params", &self.header.params)
            .field("salt", &self.header.salt)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
