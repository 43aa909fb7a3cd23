//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, cipher parameters and page
//! contents that satisfy the codec's constraints.

use pagevault_core::params::KEY_SIZE;
use pagevault_core::{
    CipherAlgorithm, CipherParams, HmacAlgorithm, IvRule, KdfAlgorithm, KeyMaterial,
};
use proptest::prelude::*;

/// Strategy for generating printable passphrases.
pub fn passphrase_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~]{1,48}").expect("Invalid regex")
}

/// Strategy for generating raw 256-bit keys.
pub fn raw_key_strategy() -> impl Strategy<Value = KeyMaterial> {
    prop::collection::vec(any::<u8>(), KEY_SIZE).prop_map(|bytes| KeyMaterial::raw(bytes))
}

/// Strategy for generating either kind of key material.
pub fn key_material_strategy() -> impl Strategy<Value = KeyMaterial> {
    prop_oneof![
        passphrase_strategy().prop_map(|text| KeyMaterial::passphrase(text)),
        raw_key_strategy(),
    ]
}

/// Strategy for generating two different passphrases.
pub fn distinct_passphrases_strategy() -> impl Strategy<Value = (String, String)> {
    (passphrase_strategy(), passphrase_strategy()).prop_filter("keys must differ", |(a, b)| a != b)
}

/// Strategy for the page cipher.
pub fn cipher_strategy() -> impl Strategy<Value = CipherAlgorithm> {
    prop_oneof![
        Just(CipherAlgorithm::Aes256Cbc),
        Just(CipherAlgorithm::Aes256Ctr),
    ]
}

/// Strategy for the page MAC.
pub fn hmac_strategy() -> impl Strategy<Value = HmacAlgorithm> {
    prop_oneof![
        Just(HmacAlgorithm::HmacSha1),
        Just(HmacAlgorithm::HmacSha256),
        Just(HmacAlgorithm::HmacSha512),
    ]
}

/// Strategy for the passphrase KDF.
pub fn kdf_strategy() -> impl Strategy<Value = KdfAlgorithm> {
    prop_oneof![
        Just(KdfAlgorithm::Pbkdf2HmacSha1),
        Just(KdfAlgorithm::Pbkdf2HmacSha256),
        Just(KdfAlgorithm::Pbkdf2HmacSha512),
    ]
}

/// Strategy for the IV rule.
pub fn iv_rule_strategy() -> impl Strategy<Value = IvRule> {
    prop_oneof![Just(IvRule::PageDerived), Just(IvRule::RandomPerWrite)]
}

/// Strategy for valid cipher parameters with small pages and a cheap KDF.
///
/// The reserve is either the minimum for the chosen MAC and IV rule or one
/// block larger.
pub fn cipher_params_strategy() -> impl Strategy<Value = CipherParams> {
    (
        cipher_strategy(),
        hmac_strategy(),
        kdf_strategy(),
        iv_rule_strategy(),
        prop_oneof![Just(512u32), Just(1024u32), Just(4096u32)],
        1u32..4,
        any::<bool>(),
    )
        .prop_map(
            |(cipher, hmac, kdf, iv_rule, page_size, kdf_iterations, padded)| {
                let required = CipherParams::required_reserve(hmac, iv_rule);
                let reserve = if padded { required + 16 } else { required };
                CipherParams {
                    cipher,
                    hmac,
                    kdf,
                    kdf_iterations,
                    iv_rule,
                    page_size,
                    reserve_size: reserve as u8,
                }
            },
        )
        .prop_filter("parameters must validate", |params| {
            params.validate().is_ok()
        })
}

/// Strategy for page data of exactly `len` bytes.
pub fn page_data_strategy(len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), len)
}

/// A single page operation.
#[derive(Debug, Clone)]
pub enum PageOperation {
    /// Append a new page.
    Allocate,
    /// Fill an existing page (chosen modulo the page count) with a byte.
    Write {
        /// Index into the current pages.
        index: u32,
        /// Fill byte.
        fill: u8,
    },
    /// Commit the current transaction, if any.
    Commit,
}

/// Strategy for a single page operation.
pub fn page_operation_strategy() -> impl Strategy<Value = PageOperation> {
    prop_oneof![
        1 => Just(PageOperation::Allocate),
        3 => (any::<u32>(), any::<u8>())
            .prop_map(|(index, fill)| PageOperation::Write { index, fill }),
        1 => Just(PageOperation::Commit),
    ]
}

/// Strategy for a batch of page operations.
pub fn page_operations_strategy(max_ops: usize) -> impl Strategy<Value = Vec<PageOperation>> {
    prop::collection::vec(page_operation_strategy(), 1..max_ops)
}
