//! Codec configuration.

use crate::error::CoreResult;
use crate::params::{
    CipherAlgorithm, CipherParams, HmacAlgorithm, IvRule, KdfAlgorithm, DEFAULT_KDF_ITERATIONS,
    DEFAULT_PAGE_SIZE,
};

/// Configuration for opening or creating a database.
///
/// The cipher settings apply when a database is created. An existing file
/// always reopens with the parameters recorded in its header.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Page size in bytes for new databases.
    pub page_size: u32,

    /// PBKDF2 iteration count for passphrase keys.
    pub kdf_iterations: u32,

    /// Page cipher.
    pub cipher: CipherAlgorithm,

    /// Page MAC.
    pub hmac: HmacAlgorithm,

    /// Passphrase KDF.
    pub kdf: KdfAlgorithm,

    /// IV derivation rule.
    pub iv_rule: IvRule,

    /// Explicit reserve size; `None` uses the smallest that fits.
    pub reserve_size: Option<u8>,

    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the database and journal on every commit.
    pub sync_on_commit: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            cipher: CipherAlgorithm::Aes256Cbc,
            hmac: HmacAlgorithm::HmacSha512,
            kdf: KdfAlgorithm::Pbkdf2HmacSha512,
            iv_rule: IvRule::PageDerived,
            reserve_size: None,
            create_if_missing: true,
            sync_on_commit: true,
        }
    }
}

impl CodecConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size for new databases.
    #[must_use]
    pub const fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the PBKDF2 iteration count.
    #[must_use]
    pub const fn kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Sets the page cipher. CTR must be paired with
    /// [`IvRule::RandomPerWrite`].
    #[must_use]
    pub const fn cipher(mut self, cipher: CipherAlgorithm) -> Self {
        self.cipher = cipher;
        self
    }

    /// Sets the page MAC.
    #[must_use]
    pub const fn hmac(mut self, hmac: HmacAlgorithm) -> Self {
        self.hmac = hmac;
        self
    }

    /// Sets the passphrase KDF.
    #[must_use]
    pub const fn kdf(mut self, kdf: KdfAlgorithm) -> Self {
        self.kdf = kdf;
        self
    }

    /// Sets the IV derivation rule.
    #[must_use]
    pub const fn iv_rule(mut self, rule: IvRule) -> Self {
        self.iv_rule = rule;
        self
    }

    /// Overrides the per-page reserve size.
    #[must_use]
    pub const fn reserve_size(mut self, size: u8) -> Self {
        self.reserve_size = Some(size);
        self
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Builds and validates the parameters a new database is created with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the combination is not usable.
    pub fn cipher_params(&self) -> CoreResult<CipherParams> {
        let reserve = match self.reserve_size {
            Some(size) => size,
            None => CipherParams::required_reserve(self.hmac, self.iv_rule) as u8,
        };
        let params = CipherParams {
            cipher: self.cipher,
            hmac: self.hmac,
            kdf: self.kdf,
            kdf_iterations: self.kdf_iterations,
            iv_rule: self.iv_rule,
            page_size: self.page_size,
            reserve_size: reserve,
        };
        params.validate()?;
        Ok(params)
    }

    /// Returns true if an existing file's parameters differ from what this
    /// configuration would have created.
    #[must_use]
    pub fn differs_from(&self, params: &CipherParams) -> bool {
        self.cipher_params()
            .map(|mine| mine != *params)
            .unwrap_or(true)
    }
}
