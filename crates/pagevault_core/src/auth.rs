//! Page authenticator: HMAC over page number, header, ciphertext and IV.
//!
//! The MAC input is `be32(pgno) || header || ciphertext || stored_iv`.
//! `header` is the cleartext codec header on page 1 and empty elsewhere, and
//! `stored_iv` is empty under the page-derived IV rule. Every component's
//! length is fixed by the page number and the cipher parameters, so the
//! concatenation is unambiguous.
//!
//! Binding the page number means a valid page copied to another offset no
//! longer verifies.

use crate::error::{CoreError, CoreResult};
use crate::params::{HmacAlgorithm, KEY_SIZE};
use crate::types::PageNumber;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

/// The authenticated fields of one page.
#[derive(Debug, Clone, Copy)]
pub struct MacInput<'a> {
    /// Page number the bytes belong to.
    pub pgno: PageNumber,
    /// Cleartext header (page 1 only).
    pub header: &'a [u8],
    /// Encrypted data region.
    pub ciphertext: &'a [u8],
    /// IV stored in the reserved region, if any.
    pub iv: &'a [u8],
}

impl MacInput<'_> {
    fn feed<M: Mac>(&self, mac: &mut M) {
        mac.update(&self.pgno.to_be_bytes());
        mac.update(self.header);
        mac.update(self.ciphertext);
        mac.update(self.iv);
    }
}

/// Computes and verifies page tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAuthenticator {
    algorithm: HmacAlgorithm,
}

impl PageAuthenticator {
    /// Creates an authenticator.
    #[must_use]
    pub const fn new(algorithm: HmacAlgorithm) -> Self {
        Self { algorithm }
    }

    /// The HMAC algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> HmacAlgorithm {
        self.algorithm
    }

    /// Size of the tags this authenticator produces.
    #[must_use]
    pub const fn tag_size(&self) -> usize {
        self.algorithm.tag_size()
    }

    /// Computes the tag for a page.
    ///
    /// # Errors
    ///
    /// Returns an error only if the HMAC cannot be keyed.
    pub fn tag(&self, input: &MacInput<'_>, hmac_key: &[u8; KEY_SIZE]) -> CoreResult<Vec<u8>> {
        match self.algorithm {
            HmacAlgorithm::HmacSha1 => compute::<Hmac<Sha1>>(hmac_key, input),
            HmacAlgorithm::HmacSha256 => compute::<Hmac<Sha256>>(hmac_key, input),
            HmacAlgorithm::HmacSha512 => compute::<Hmac<Sha512>>(hmac_key, input),
        }
    }

    /// Verifies a page tag in constant time with respect to the tag value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Integrity`] for the page if the tag does not match.
    pub fn verify(
        &self,
        input: &MacInput<'_>,
        tag: &[u8],
        hmac_key: &[u8; KEY_SIZE],
    ) -> CoreResult<()> {
        let matches = match self.algorithm {
            HmacAlgorithm::HmacSha1 => check::<Hmac<Sha1>>(hmac_key, input, tag)?,
            HmacAlgorithm::HmacSha256 => check::<Hmac<Sha256>>(hmac_key, input, tag)?,
            HmacAlgorithm::HmacSha512 => check::<Hmac<Sha512>>(hmac_key, input, tag)?,
        };
        if matches {
            Ok(())
        } else {
            Err(CoreError::integrity(input.pgno.as_u32()))
        }
    }
}

fn keyed<M: Mac + KeyInit>(key: &[u8]) -> CoreResult<M> {
    <M as Mac>::new_from_slice(key).map_err(|_| CoreError::key_derivation("invalid HMAC key length"))
}

fn compute<M: Mac + KeyInit>(key: &[u8], input: &MacInput<'_>) -> CoreResult<Vec<u8>> {
    let mut mac = keyed::<M>(key)?;
    input.feed(&mut mac);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn check<M: Mac + KeyInit>(key: &[u8], input: &MacInput<'_>, tag: &[u8]) -> CoreResult<bool> {
    let mut mac = keyed::<M>(key)?;
    input.feed(&mut mac);
    // verify_slice compares in constant time and rejects wrong lengths.
    Ok(mac.verify_slice(tag).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; KEY_SIZE] = [0x5a; KEY_SIZE];

    fn input<'a>(pgno: u32, ciphertext: &'a [u8]) -> MacInput<'a> {
        MacInput {
            pgno: PageNumber::new(pgno),
            header: &[],
            ciphertext,
            iv: &[],
        }
    }

    #[test]
    fn tag_sizes_match_algorithms() {
        let data = [1u8; 64];
        for algorithm in [
            HmacAlgorithm::HmacSha1,
            HmacAlgorithm::HmacSha256,
            HmacAlgorithm::HmacSha512,
        ] {
            let auth = PageAuthenticator::new(algorithm);
            let tag = auth.tag(&input(2, &data), &KEY).unwrap();
            assert_eq!(tag.len(), algorithm.tag_size());
            auth.verify(&input(2, &data), &tag, &KEY).unwrap();
        }
    }

    #[test]
    fn tag_matches_plain_hmac_over_concatenation() {
        let auth = PageAuthenticator::new(HmacAlgorithm::HmacSha256);
        let header = [9u8; 48];
        let iv = [3u8; 16];
        let ciphertext = [7u8; 32];
        let tag = auth
            .tag(
                &MacInput {
                    pgno: PageNumber::new(1),
                    header: &header,
                    ciphertext: &ciphertext,
                    iv: &iv,
                },
                &KEY,
            )
            .unwrap();

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&KEY).unwrap();
        mac.update(&1u32.to_be_bytes());
        mac.update(&header);
        mac.update(&ciphertext);
        mac.update(&iv);
        assert_eq!(tag, mac.finalize().into_bytes().to_vec());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let auth = PageAuthenticator::new(HmacAlgorithm::HmacSha512);
        let mut data = vec![0xAB; 128];
        let tag = auth.tag(&input(4, &data), &KEY).unwrap();

        data[17] ^= 0x01;
        let result = auth.verify(&input(4, &data), &tag, &KEY);
        assert!(matches!(result, Err(CoreError::Integrity { page: 4 })));
    }

    #[test]
    fn page_swap_fails() {
        let auth = PageAuthenticator::new(HmacAlgorithm::HmacSha512);
        let data = vec![0xCD; 128];
        let tag = auth.tag(&input(4, &data), &KEY).unwrap();

        let result = auth.verify(&input(5, &data), &tag, &KEY);
        assert!(matches!(result, Err(CoreError::Integrity { page: 5 })));
    }

    #[test]
    fn header_is_bound() {
        let auth = PageAuthenticator::new(HmacAlgorithm::HmacSha1);
        let data = [0u8; 32];
        let header = [1u8; 48];
        let mut tampered = header;
        tampered[20] = 2;

        let original = MacInput {
            pgno: PageNumber::FIRST,
            header: &header,
            ciphertext: &data,
            iv: &[],
        };
        let tag = auth.tag(&original, &KEY).unwrap();
        let forged = MacInput {
            header: &tampered,
            ..original
        };
        assert!(auth.verify(&forged, &tag, &KEY).is_err());
    }

    #[test]
    fn wrong_key_and_truncated_tag_fail() {
        let auth = PageAuthenticator::new(HmacAlgorithm::HmacSha256);
        let data = [0u8; 32];
        let tag = auth.tag(&input(2, &data), &KEY).unwrap();

        assert!(auth.verify(&input(2, &data), &tag, &[0x5b; KEY_SIZE]).is_err());
        assert!(auth.verify(&input(2, &data), &tag[..16], &KEY).is_err());
    }

    proptest! {
        #[test]
        fn any_single_bit_flip_is_detected(
            data in prop::collection::vec(any::<u8>(), 16..256),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let auth = PageAuthenticator::new(HmacAlgorithm::HmacSha512);
            let tag = auth.tag(&input(3, &data), &KEY).unwrap();

            let mut flipped = data.clone();
            let at = index.index(flipped.len());
            flipped[at] ^= 1 << bit;
            prop_assert!(auth.verify(&input(3, &flipped), &tag, &KEY).is_err());
        }
    }
}
