//! Key derivation: key material + salt → page-encryption key and page-HMAC key.
//!
//! ## Derivation
//!
//! - Passphrase: `enc = PBKDF2-HMAC-<kdf>(passphrase, salt, iterations)`
//! - Raw key: exactly [`KEY_SIZE`] bytes, used directly as `enc`
//! - Both: `hmac = HKDF-SHA256(salt ^ 0x3a, enc, "pagevault page-hmac key v1")`
//!
//! The HMAC key is expanded in its own context (masked salt, distinct info
//! label), so the two sub-keys are never equal or trivially related.

use crate::error::{CoreError, CoreResult};
use crate::params::{KdfAlgorithm, KEY_SIZE, SALT_SIZE};
use hkdf::Hkdf;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Byte XORed into the salt before deriving the HMAC key.
const HMAC_SALT_MASK: u8 = 0x3a;
/// HKDF info label for the HMAC key.
const HMAC_KEY_INFO: &[u8] = b"pagevault page-hmac key v1";

/// Per-database random salt, stored in the cleartext header.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a fresh random salt.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates a salt from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyDerivation` if the slice is not exactly [`SALT_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let array: [u8; SALT_SIZE] = bytes.try_into().map_err(|_| {
            CoreError::key_derivation(format!(
                "invalid salt size: expected {SALT_SIZE}, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Returns the salt bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", hex::encode(self.0))
    }
}

/// Key material supplied by the caller.
///
/// Buffers are zeroized when the material is dropped.
#[derive(Clone)]
pub enum KeyMaterial {
    /// A passphrase, stretched with PBKDF2.
    Passphrase(Zeroizing<Vec<u8>>),
    /// An already-derived 256-bit key, used without stretching.
    Raw(Zeroizing<Vec<u8>>),
}

impl KeyMaterial {
    /// Creates passphrase key material.
    pub fn passphrase(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Passphrase(Zeroizing::new(bytes.into()))
    }

    /// Creates raw key material.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Raw(Zeroizing::new(bytes.into()))
    }

    /// Parses a key string.
    ///
    /// `x'<hex>'` (case-insensitive prefix) is a raw key literal; anything
    /// else is a passphrase.
    ///
    /// # Errors
    ///
    /// Returns `KeyDerivation` if a raw key literal is not valid hex.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let literal = text
            .strip_prefix("x'")
            .or_else(|| text.strip_prefix("X'"))
            .and_then(|rest| rest.strip_suffix('\''));

        match literal {
            Some(hex_digits) => {
                let bytes = Zeroizing::new(
                    hex::decode(hex_digits)
                        .map_err(|e| CoreError::key_derivation(format!("invalid raw key: {e}")))?,
                );
                Ok(Self::Raw(bytes))
            }
            None => Ok(Self::passphrase(text.as_bytes())),
        }
    }

    /// Returns true for raw key material.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Self::Passphrase(bytes) | Self::Raw(bytes) => bytes,
        }
    }
}

impl From<&str> for KeyMaterial {
    fn from(passphrase: &str) -> Self {
        Self::passphrase(passphrase.as_bytes())
    }
}

impl From<String> for KeyMaterial {
    fn from(passphrase: String) -> Self {
        Self::passphrase(passphrase.into_bytes())
    }
}

impl From<&[u8]> for KeyMaterial {
    fn from(passphrase: &[u8]) -> Self {
        Self::passphrase(passphrase)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_raw() { "Raw" } else { "Passphrase" };
        f.debug_tuple(kind).field(&"[REDACTED]").finish()
    }
}

/// Derived page-encryption and page-HMAC keys.
///
/// The key is automatically zeroized when dropped. Not `Clone`: the only
/// copy lives in the session's codec.
///
/// ```compile_fail
/// fn copy(key: &pagevault_core::DatabaseKey) -> pagevault_core::DatabaseKey {
///     key.clone()
/// }
/// ```
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DatabaseKey {
    enc: [u8; KEY_SIZE],
    hmac: [u8; KEY_SIZE],
}

impl DatabaseKey {
    /// The page-encryption key.
    ///
    /// # Security
    ///
    /// Don't log or copy the result into long-lived structures.
    #[must_use]
    pub fn enc_key(&self) -> &[u8; KEY_SIZE] {
        &self.enc
    }

    /// The page-HMAC key.
    #[must_use]
    pub fn hmac_key(&self) -> &[u8; KEY_SIZE] {
        &self.hmac
    }
}

impl fmt::Debug for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseKey")
            .field("enc", &"[REDACTED]")
            .field("hmac", &"[REDACTED]")
            .finish()
    }
}

/// Derives the page keys for a database.
///
/// Pure: the same inputs always yield the same key pair.
///
/// # Errors
///
/// Returns `KeyDerivation` if the material is empty, a raw key is not
/// [`KEY_SIZE`] bytes, the salt is not [`SALT_SIZE`] bytes, or `iterations`
/// is zero.
pub fn derive(
    material: &KeyMaterial,
    salt: &[u8],
    kdf: KdfAlgorithm,
    iterations: u32,
) -> CoreResult<DatabaseKey> {
    let salt = Salt::from_bytes(salt)?;
    let bytes = material.bytes();
    if bytes.is_empty() {
        return Err(CoreError::key_derivation("key material is empty"));
    }

    let mut key = DatabaseKey {
        enc: [0u8; KEY_SIZE],
        hmac: [0u8; KEY_SIZE],
    };

    match material {
        KeyMaterial::Raw(raw) => {
            if raw.len() != KEY_SIZE {
                return Err(CoreError::key_derivation(format!(
                    "invalid raw key size: expected {KEY_SIZE}, got {}",
                    raw.len()
                )));
            }
            key.enc.copy_from_slice(raw);
        }
        KeyMaterial::Passphrase(passphrase) => {
            if iterations == 0 {
                return Err(CoreError::key_derivation("KDF iterations must be at least 1"));
            }
            let salt = salt.as_bytes();
            match kdf {
                KdfAlgorithm::Pbkdf2HmacSha1 => {
                    pbkdf2::pbkdf2_hmac::<Sha1>(passphrase, salt, iterations, &mut key.enc);
                }
                KdfAlgorithm::Pbkdf2HmacSha256 => {
                    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, salt, iterations, &mut key.enc);
                }
                KdfAlgorithm::Pbkdf2HmacSha512 => {
                    pbkdf2::pbkdf2_hmac::<Sha512>(passphrase, salt, iterations, &mut key.enc);
                }
            }
        }
    }

    let mut hmac_salt = *salt.as_bytes();
    for byte in &mut hmac_salt {
        *byte ^= HMAC_SALT_MASK;
    }
    let hk = Hkdf::<Sha256>::new(Some(&hmac_salt), &key.enc);
    hk.expand(HMAC_KEY_INFO, &mut key.hmac)
        .map_err(|_| CoreError::key_derivation("HKDF expand failed"))?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; SALT_SIZE] = [7u8; SALT_SIZE];
    const KDF: KdfAlgorithm = KdfAlgorithm::Pbkdf2HmacSha512;

    #[test]
    fn derivation_is_deterministic() {
        let material = KeyMaterial::from("correct horse");
        let key1 = derive(&material, &SALT, KDF, 100).unwrap();
        let key2 = derive(&material, &SALT, KDF, 100).unwrap();

        assert_eq!(key1.enc_key(), key2.enc_key());
        assert_eq!(key1.hmac_key(), key2.hmac_key());
    }

    #[test]
    fn pbkdf2_matches_direct_computation() {
        let material = KeyMaterial::from("password");
        let key = derive(&material, &SALT, KdfAlgorithm::Pbkdf2HmacSha256, 3).unwrap();

        let mut expected = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha256>(b"password", &SALT, 3, &mut expected);
        assert_eq!(key.enc_key(), &expected);
    }

    #[test]
    fn sub_keys_differ() {
        let key = derive(&KeyMaterial::from("pw"), &SALT, KDF, 10).unwrap();
        assert_ne!(key.enc_key(), key.hmac_key());
    }

    #[test]
    fn salt_iterations_and_algorithm_matter() {
        let material = KeyMaterial::from("pw");
        let base = derive(&material, &SALT, KDF, 10).unwrap();

        let other_salt = derive(&material, &[8u8; SALT_SIZE], KDF, 10).unwrap();
        let other_iter = derive(&material, &SALT, KDF, 11).unwrap();
        let other_kdf = derive(&material, &SALT, KdfAlgorithm::Pbkdf2HmacSha1, 10).unwrap();

        assert_ne!(base.enc_key(), other_salt.enc_key());
        assert_ne!(base.hmac_key(), other_salt.hmac_key());
        assert_ne!(base.enc_key(), other_iter.enc_key());
        assert_ne!(base.enc_key(), other_kdf.enc_key());
    }

    #[test]
    fn raw_key_bypasses_pbkdf2() {
        let raw = [0x42u8; KEY_SIZE];
        let key = derive(&KeyMaterial::raw(raw.to_vec()), &SALT, KDF, 0).unwrap();
        assert_eq!(key.enc_key(), &raw);
        assert_ne!(key.hmac_key(), &raw);
    }

    #[test]
    fn raw_key_wrong_size_fails() {
        let result = derive(&KeyMaterial::raw(vec![1u8; 16]), &SALT, KDF, 10);
        assert!(matches!(result, Err(CoreError::KeyDerivation { .. })));
    }

    #[test]
    fn empty_material_fails() {
        let result = derive(&KeyMaterial::from(""), &SALT, KDF, 10);
        assert!(matches!(result, Err(CoreError::KeyDerivation { .. })));
    }

    #[test]
    fn wrong_salt_length_fails() {
        let result = derive(&KeyMaterial::from("pw"), &[0u8; 8], KDF, 10);
        assert!(matches!(result, Err(CoreError::KeyDerivation { .. })));
    }

    #[test]
    fn zero_iterations_fails_for_passphrase() {
        let result = derive(&KeyMaterial::from("pw"), &SALT, KDF, 0);
        assert!(matches!(result, Err(CoreError::KeyDerivation { .. })));
    }

    #[test]
    fn parse_raw_literal() {
        let literal = format!("x'{}'", "ab".repeat(KEY_SIZE));
        let material = KeyMaterial::parse(&literal).unwrap();
        assert!(material.is_raw());
        assert_eq!(material.bytes(), &[0xAB; KEY_SIZE]);

        let upper = format!("X'{}'", "CD".repeat(KEY_SIZE));
        assert!(KeyMaterial::parse(&upper).unwrap().is_raw());
    }

    #[test]
    fn parse_passphrase_and_bad_hex() {
        assert!(!KeyMaterial::parse("x'not closed").unwrap().is_raw());
        assert!(KeyMaterial::parse("x'zz'").is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let material = KeyMaterial::from("hunter2");
        assert!(!format!("{material:?}").contains("hunter2"));

        let key = derive(&material, &SALT, KDF, 1).unwrap();
        assert!(format!("{key:?}").contains("REDACTED"));
    }

    #[test]
    fn generated_salts_differ() {
        assert_ne!(Salt::generate(), Salt::generate());
    }
}
