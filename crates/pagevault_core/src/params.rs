//! Cipher parameters persisted in the database header.
//!
//! Every field here is fixed for the lifetime of a database file. The header
//! records them so that a cold open rebuilds exactly the pipeline that wrote
//! the file, without any process-wide provider state.

use crate::error::{CoreError, CoreResult};
use crate::header::HEADER_SIZE;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Current on-disk format version.
pub const FORMAT_VERSION: u8 = 1;
/// Size of every derived key in bytes (256-bit).
pub const KEY_SIZE: usize = 32;
/// Size of the salt stored in the header.
pub const SALT_SIZE: usize = 16;
/// AES block size, which is also the IV size.
pub const BLOCK_SIZE: usize = 16;
/// Smallest supported page size.
pub const MIN_PAGE_SIZE: u32 = 512;
/// Largest supported page size.
pub const MAX_PAGE_SIZE: u32 = 65536;
/// Default page size.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;
/// Default PBKDF2 iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 256_000;

/// Block cipher mode used for page data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum CipherAlgorithm {
    /// AES-256 in CBC mode without padding.
    Aes256Cbc = 1,
    /// AES-256 in CTR mode with a 128-bit big-endian counter.
    Aes256Ctr = 2,
}

impl CipherAlgorithm {
    /// Converts a header byte to an algorithm.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Aes256Cbc),
            2 => Some(Self::Aes256Ctr),
            _ => None,
        }
    }

    /// The header byte for this algorithm.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Aes256Cbc => "aes-256-cbc",
            Self::Aes256Ctr => "aes-256-ctr",
        }
    }

    /// CBC works on whole blocks, so encrypted regions must be block-aligned.
    #[must_use]
    pub const fn requires_block_alignment(self) -> bool {
        matches!(self, Self::Aes256Cbc)
    }

    /// A stream mode leaks the XOR of two plaintexts if an IV ever repeats
    /// under one key, so every write needs a fresh IV.
    #[must_use]
    pub const fn requires_fresh_iv(self) -> bool {
        matches!(self, Self::Aes256Ctr)
    }
}

/// MAC used to authenticate each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum HmacAlgorithm {
    /// HMAC-SHA1, 20-byte tag.
    HmacSha1 = 1,
    /// HMAC-SHA256, 32-byte tag.
    HmacSha256 = 2,
    /// HMAC-SHA512, 64-byte tag.
    HmacSha512 = 3,
}

impl HmacAlgorithm {
    /// Converts a header byte to an algorithm.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::HmacSha1),
            2 => Some(Self::HmacSha256),
            3 => Some(Self::HmacSha512),
            _ => None,
        }
    }

    /// The header byte for this algorithm.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Size of the tag in bytes.
    #[must_use]
    pub const fn tag_size(self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
            Self::HmacSha512 => 64,
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::HmacSha1 => "hmac-sha1",
            Self::HmacSha256 => "hmac-sha256",
            Self::HmacSha512 => "hmac-sha512",
        }
    }
}

/// Password-based key derivation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum KdfAlgorithm {
    /// PBKDF2 with HMAC-SHA1.
    Pbkdf2HmacSha1 = 1,
    /// PBKDF2 with HMAC-SHA256.
    Pbkdf2HmacSha256 = 2,
    /// PBKDF2 with HMAC-SHA512.
    Pbkdf2HmacSha512 = 3,
}

impl KdfAlgorithm {
    /// Converts a header byte to an algorithm.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Pbkdf2HmacSha1),
            2 => Some(Self::Pbkdf2HmacSha256),
            3 => Some(Self::Pbkdf2HmacSha512),
            _ => None,
        }
    }

    /// The header byte for this algorithm.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pbkdf2HmacSha1 => "pbkdf2-hmac-sha1",
            Self::Pbkdf2HmacSha256 => "pbkdf2-hmac-sha256",
            Self::Pbkdf2HmacSha512 => "pbkdf2-hmac-sha512",
        }
    }
}

/// How the per-page IV is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum IvRule {
    /// Derived from the encryption key and page number; nothing is stored.
    PageDerived = 0,
    /// Fresh random IV on every write, stored in the reserved region.
    RandomPerWrite = 1,
}

impl IvRule {
    /// Converts a header byte to a rule.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::PageDerived),
            1 => Some(Self::RandomPerWrite),
            _ => None,
        }
    }

    /// The header byte for this rule.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Bytes of IV stored in each page's reserved region.
    #[must_use]
    pub const fn stored_iv_size(self) -> usize {
        match self {
            Self::PageDerived => 0,
            Self::RandomPerWrite => BLOCK_SIZE,
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PageDerived => "page-derived",
            Self::RandomPerWrite => "random-per-write",
        }
    }
}

macro_rules! impl_name_parsing {
    ($ty:ty, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                [$($variant),+]
                    .into_iter()
                    .find(|candidate| candidate.name() == wanted)
                    .ok_or_else(|| {
                        CoreError::invalid_config(format!(
                            "unknown {}: {s}",
                            stringify!($ty)
                        ))
                    })
            }
        }
    };
}

impl_name_parsing!(CipherAlgorithm, [CipherAlgorithm::Aes256Cbc, CipherAlgorithm::Aes256Ctr]);
impl_name_parsing!(
    HmacAlgorithm,
    [HmacAlgorithm::HmacSha1, HmacAlgorithm::HmacSha256, HmacAlgorithm::HmacSha512]
);
impl_name_parsing!(
    KdfAlgorithm,
    [
        KdfAlgorithm::Pbkdf2HmacSha1,
        KdfAlgorithm::Pbkdf2HmacSha256,
        KdfAlgorithm::Pbkdf2HmacSha512,
    ]
);
impl_name_parsing!(IvRule, [IvRule::PageDerived, IvRule::RandomPerWrite]);

/// The complete, persisted description of a database's codec pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CipherParams {
    /// Page cipher.
    pub cipher: CipherAlgorithm,
    /// Page MAC.
    pub hmac: HmacAlgorithm,
    /// Passphrase KDF.
    pub kdf: KdfAlgorithm,
    /// PBKDF2 iteration count.
    pub kdf_iterations: u32,
    /// IV derivation rule.
    pub iv_rule: IvRule,
    /// Page size in bytes.
    pub page_size: u32,
    /// Trailing bytes per page reserved for IV and tag.
    pub reserve_size: u8,
}

impl CipherParams {
    /// Smallest reserve that fits the stored IV and tag, rounded up to a whole
    /// cipher block so the data region stays block-aligned.
    #[must_use]
    pub const fn required_reserve(hmac: HmacAlgorithm, iv_rule: IvRule) -> usize {
        let raw = iv_rule.stored_iv_size() + hmac.tag_size();
        raw.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
    }

    /// Page size as `usize`.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size as usize
    }

    /// Reserve size as `usize`.
    #[must_use]
    pub const fn reserve_size(&self) -> usize {
        self.reserve_size as usize
    }

    /// Bytes per page visible above the codec.
    #[must_use]
    pub const fn usable_size(&self) -> usize {
        self.page_size() - self.reserve_size()
    }

    /// Checks every constraint the codec relies on.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first violated constraint.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(CoreError::invalid_config(format!(
                "page size must be a power of two between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }

        if self.kdf_iterations == 0 {
            return Err(CoreError::invalid_config("KDF iterations must be at least 1"));
        }

        if self.cipher.requires_fresh_iv() && self.iv_rule == IvRule::PageDerived {
            return Err(CoreError::invalid_config(format!(
                "{} needs the {} IV rule, a page-derived IV repeats on every rewrite",
                self.cipher,
                IvRule::RandomPerWrite
            )));
        }

        let required = Self::required_reserve(self.hmac, self.iv_rule);
        let reserve = self.reserve_size();
        if reserve < self.iv_rule.stored_iv_size() + self.hmac.tag_size() {
            return Err(CoreError::invalid_config(format!(
                "reserve size {reserve} cannot hold IV and tag (need {required})"
            )));
        }
        if self.cipher.requires_block_alignment() && reserve % BLOCK_SIZE != 0 {
            return Err(CoreError::invalid_config(format!(
                "reserve size {reserve} must be a multiple of {BLOCK_SIZE} for {}",
                self.cipher
            )));
        }
        if reserve + HEADER_SIZE >= self.page_size() {
            return Err(CoreError::invalid_config(format!(
                "reserve size {reserve} leaves no room for data in a {} byte page",
                self.page_size
            )));
        }

        Ok(())
    }
}

impl Default for CipherParams {
    fn default() -> Self {
        let hmac = HmacAlgorithm::HmacSha512;
        let iv_rule = IvRule::PageDerived;
        Self {
            cipher: CipherAlgorithm::Aes256Cbc,
            hmac,
            kdf: KdfAlgorithm::Pbkdf2HmacSha512,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            iv_rule,
            page_size: DEFAULT_PAGE_SIZE,
            reserve_size: Self::required_reserve(hmac, iv_rule) as u8,
        }
    }
}
