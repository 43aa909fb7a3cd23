//! Benchmark utilities.

#![warn(missing_docs)]

use pagevault_core::{
    CipherAlgorithm, CipherCodec, CipherParams, CodecConfig, CodecHeader, HmacAlgorithm, IvRule,
    KeyMaterial, Salt,
};
use rand::Rng;

/// Generate `size` bytes of random page data.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Every valid cipher, MAC and IV rule combination, with a readable label.
pub fn pipelines(page_size: u32) -> Vec<(String, CipherParams)> {
    let mut out = Vec::new();
    for cipher in [CipherAlgorithm::Aes256Cbc, CipherAlgorithm::Aes256Ctr] {
        for hmac in [
            HmacAlgorithm::HmacSha1,
            HmacAlgorithm::HmacSha256,
            HmacAlgorithm::HmacSha512,
        ] {
            for iv_rule in [IvRule::PageDerived, IvRule::RandomPerWrite] {
                let params = CipherParams {
                    cipher,
                    hmac,
                    iv_rule,
                    page_size,
                    reserve_size: CipherParams::required_reserve(hmac, iv_rule) as u8,
                    ..CipherParams::default()
                };
                if params.validate().is_ok() {
                    out.push((format!("{cipher}/{hmac}/{iv_rule}"), params));
                }
            }
        }
    }
    out
}

/// A codec with a random raw key and salt.
pub fn codec_for(params: CipherParams) -> CipherCodec {
    let header = CodecHeader::new(params, Salt::generate());
    CipherCodec::derive(header, &KeyMaterial::raw(random_data(32)))
        .expect("benchmark parameters are valid")
}

/// A configuration with a cheap KDF for database benchmarks.
pub fn bench_config(page_size: u32) -> CodecConfig {
    CodecConfig::new()
        .page_size(page_size)
        .kdf_iterations(2)
        .sync_on_commit(false)
}
