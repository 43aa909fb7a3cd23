//! Page cipher: AES-256 in CBC or CTR mode over a page's data region.
//!
//! The cipher only transforms bytes. It cannot tell a wrong key from a right
//! one; decrypting with the wrong key simply yields garbage. Detecting that
//! is the authenticator's job.
//!
//! CBC runs without padding. Data regions are always a whole number of
//! blocks because page sizes are powers of two and reserve sizes are
//! validated to be block multiples, and a misaligned region is an error
//! rather than something to pad or truncate.

use crate::error::{CoreError, CoreResult};
use crate::params::{CipherAlgorithm, IvRule, BLOCK_SIZE, KEY_SIZE};
use crate::types::PageNumber;
use aes::Aes256;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use rand::RngCore;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Domain label for page-derived IVs.
const IV_LABEL: &[u8] = b"pagevault-iv";

/// Derives the IV for a page from the encryption key and page number:
/// `SHA-256("pagevault-iv" || enc_key || be32(pgno))[..16]`.
///
/// Distinct for every page under one key, and different again after a rekey
/// because the key changes. The IV repeats when a page is rewritten, so only
/// CBC accepts this rule.
#[must_use]
pub fn derive_iv(enc_key: &[u8; KEY_SIZE], pgno: PageNumber) -> [u8; BLOCK_SIZE] {
    let digest = Sha256::new()
        .chain_update(IV_LABEL)
        .chain_update(enc_key)
        .chain_update(pgno.to_be_bytes())
        .finalize();

    let mut iv = [0u8; BLOCK_SIZE];
    iv.copy_from_slice(&digest[..BLOCK_SIZE]);
    iv
}

/// Encrypts and decrypts page data regions in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCipher {
    algorithm: CipherAlgorithm,
    iv_rule: IvRule,
}

impl PageCipher {
    /// Creates a page cipher.
    #[must_use]
    pub const fn new(algorithm: CipherAlgorithm, iv_rule: IvRule) -> Self {
        Self { algorithm, iv_rule }
    }

    /// The cipher algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// The IV rule.
    #[must_use]
    pub const fn iv_rule(&self) -> IvRule {
        self.iv_rule
    }

    /// Produces the IV for writing a page.
    #[must_use]
    pub fn iv_for_write(&self, pgno: PageNumber, enc_key: &[u8; KEY_SIZE]) -> [u8; BLOCK_SIZE] {
        match self.iv_rule {
            IvRule::PageDerived => derive_iv(enc_key, pgno),
            IvRule::RandomPerWrite => {
                let mut iv = [0u8; BLOCK_SIZE];
                rand::thread_rng().fill_bytes(&mut iv);
                iv
            }
        }
    }

    /// Recovers the IV for reading a page.
    ///
    /// `stored` is the IV slice from the reserved region; it is empty under
    /// [`IvRule::PageDerived`].
    ///
    /// # Errors
    ///
    /// Returns an error if a stored IV has the wrong length.
    pub fn iv_for_read(
        &self,
        pgno: PageNumber,
        enc_key: &[u8; KEY_SIZE],
        stored: &[u8],
    ) -> CoreResult<[u8; BLOCK_SIZE]> {
        match self.iv_rule {
            IvRule::PageDerived => Ok(derive_iv(enc_key, pgno)),
            IvRule::RandomPerWrite => stored.try_into().map_err(|_| {
                CoreError::unsupported_format(format!(
                    "stored IV for {pgno} has {} bytes, expected {BLOCK_SIZE}",
                    stored.len()
                ))
            }),
        }
    }

    /// Encrypts `region` in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if CBC is asked to encrypt a region that is
    /// not a whole number of blocks.
    pub fn encrypt(
        &self,
        iv: &[u8; BLOCK_SIZE],
        region: &mut [u8],
        enc_key: &[u8; KEY_SIZE],
    ) -> CoreResult<()> {
        match self.algorithm {
            CipherAlgorithm::Aes256Cbc => {
                check_block_aligned(region.len())?;
                let mut encryptor = Aes256CbcEnc::new(enc_key.into(), iv.into());
                for block in region.chunks_exact_mut(BLOCK_SIZE) {
                    encryptor.encrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            }
            CipherAlgorithm::Aes256Ctr => {
                let mut stream = Aes256Ctr::new(enc_key.into(), iv.into());
                stream.apply_keystream(region);
            }
        }
        Ok(())
    }

    /// Decrypts `region` in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if CBC is asked to decrypt a region that is
    /// not a whole number of blocks.
    pub fn decrypt(
        &self,
        iv: &[u8; BLOCK_SIZE],
        region: &mut [u8],
        enc_key: &[u8; KEY_SIZE],
    ) -> CoreResult<()> {
        match self.algorithm {
            CipherAlgorithm::Aes256Cbc => {
                check_block_aligned(region.len())?;
                let mut decryptor = Aes256CbcDec::new(enc_key.into(), iv.into());
                for block in region.chunks_exact_mut(BLOCK_SIZE) {
                    decryptor.decrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            }
            CipherAlgorithm::Aes256Ctr => {
                let mut stream = Aes256Ctr::new(enc_key.into(), iv.into());
                stream.apply_keystream(region);
            }
        }
        Ok(())
    }
}

fn check_block_aligned(len: usize) -> CoreResult<()> {
    if len % BLOCK_SIZE != 0 {
        return Err(CoreError::invalid_config(format!(
            "CBC region of {len} bytes is not a multiple of {BLOCK_SIZE}"
        )));
    }
    Ok(())
}
