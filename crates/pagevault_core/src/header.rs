//! Cleartext codec header at the start of page 1.
//!
//! ## Layout (big-endian)
//!
//! | Offset | Size | Field                     |
//! |--------|------|---------------------------|
//! | 0      | 8    | magic `PGVAULT\0`         |
//! | 8      | 1    | format version            |
//! | 9      | 1    | cipher id                 |
//! | 10     | 1    | HMAC id                   |
//! | 11     | 1    | KDF id                    |
//! | 12     | 1    | IV rule                   |
//! | 13     | 1    | reserve size              |
//! | 14     | 2    | zero                      |
//! | 16     | 4    | page size                 |
//! | 20     | 4    | KDF iterations            |
//! | 24     | 16   | salt                      |
//! | 40     | 8    | zero                      |
//!
//! The header is not encrypted, since the salt and parameters are needed
//! before any key exists, but it is covered by page 1's tag.

use crate::error::{CoreError, CoreResult};
use crate::kdf::Salt;
use crate::params::{
    CipherAlgorithm, CipherParams, HmacAlgorithm, IvRule, KdfAlgorithm, FORMAT_VERSION, SALT_SIZE,
};

/// Magic bytes identifying a PageVault database.
pub const HEADER_MAGIC: [u8; 8] = *b"PGVAULT\0";

/// Size of the cleartext header in bytes.
pub const HEADER_SIZE: usize = 48;

/// Decoded codec header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecHeader {
    /// Cipher parameters the file was written with.
    pub params: CipherParams,
    /// Per-database salt.
    pub salt: Salt,
}

impl CodecHeader {
    /// Creates a header.
    #[must_use]
    pub const fn new(params: CipherParams, salt: Salt) -> Self {
        Self { params, salt }
    }

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let params = &self.params;

        buf[0..8].copy_from_slice(&HEADER_MAGIC);
        buf[8] = FORMAT_VERSION;
        buf[9] = params.cipher.id();
        buf[10] = params.hmac.id();
        buf[11] = params.kdf.id();
        buf[12] = params.iv_rule.id();
        buf[13] = params.reserve_size;
        buf[16..20].copy_from_slice(&params.page_size.to_be_bytes());
        buf[20..24].copy_from_slice(&params.kdf_iterations.to_be_bytes());
        buf[24..24 + SALT_SIZE].copy_from_slice(self.salt.as_bytes());

        buf
    }

    /// Returns true if `data` starts with the header magic.
    #[must_use]
    pub fn has_magic(data: &[u8]) -> bool {
        data.len() >= HEADER_MAGIC.len() && data[..HEADER_MAGIC.len()] == HEADER_MAGIC
    }

    /// Decodes a header from the start of page 1.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFormat` for a bad magic, an unknown version or
    /// algorithm id, or parameters that do not describe a usable pipeline.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CoreError::unsupported_format(format!(
                "header too short: {} bytes",
                data.len()
            )));
        }
        if !Self::has_magic(data) {
            return Err(CoreError::unsupported_format(
                "not a PageVault database (bad header magic)",
            ));
        }

        let version = data[8];
        if version != FORMAT_VERSION {
            return Err(CoreError::unsupported_format(format!(
                "unsupported format version: {version}"
            )));
        }

        let cipher = CipherAlgorithm::from_id(data[9]).ok_or_else(|| {
            CoreError::unsupported_format(format!("unknown cipher id: {}", data[9]))
        })?;
        let hmac = HmacAlgorithm::from_id(data[10]).ok_or_else(|| {
            CoreError::unsupported_format(format!("unknown HMAC id: {}", data[10]))
        })?;
        let kdf = KdfAlgorithm::from_id(data[11])
            .ok_or_else(|| CoreError::unsupported_format(format!("unknown KDF id: {}", data[11])))?;
        let iv_rule = IvRule::from_id(data[12]).ok_or_else(|| {
            CoreError::unsupported_format(format!("unknown IV rule: {}", data[12]))
        })?;

        let page_size = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
        let kdf_iterations = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        let salt = Salt::from_bytes(&data[24..24 + SALT_SIZE])?;

        let params = CipherParams {
            cipher,
            hmac,
            kdf,
            kdf_iterations,
            iv_rule,
            page_size,
            reserve_size: data[13],
        };
        params
            .validate()
            .map_err(|e| CoreError::unsupported_format(format!("invalid header parameters: {e}")))?;

        Ok(Self { params, salt })
    }
}
