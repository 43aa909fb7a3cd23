//! Codec test vectors for PageVault.
//!
//! A vector pins one encoded page for a fixed key, salt and page number.
//! With the page-derived IV rule encoding is deterministic, so a vector
//! checks that the on-disk image of a page is stable and still decodes.
//! Random-IV vectors can only be checked by decoding.
//! Vectors serialize to JSON so other readers of the format can load them.

use pagevault_core::{
    CipherAlgorithm, CipherCodec, CipherParams, CodecHeader, HmacAlgorithm, IvRule, KeyMaterial,
    PageCodec, PageNumber, Salt, HEADER_SIZE,
};
use serde::{Deserialize, Serialize};

/// Raw key used by every generated vector.
pub const VECTOR_KEY: [u8; 32] = [0x42; 32];

/// Salt used by every generated vector.
pub const VECTOR_SALT: [u8; 16] = [0x5a; 16];

/// A page codec test vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Cipher name.
    pub cipher: String,
    /// HMAC name.
    pub hmac: String,
    /// IV rule name.
    pub iv_rule: String,
    /// Page size in bytes.
    pub page_size: u32,
    /// Reserve size in bytes.
    pub reserve_size: u8,
    /// Raw key (hex-encoded).
    pub key_hex: String,
    /// Salt (hex-encoded).
    pub salt_hex: String,
    /// Page number.
    pub pgno: u32,
    /// Full page image handed to the codec (hex-encoded).
    pub plain_hex: String,
    /// Encoded page image (hex-encoded).
    pub encoded_hex: String,
}

impl CodecVector {
    fn params(&self) -> Result<CipherParams, String> {
        Ok(CipherParams {
            cipher: self.cipher.parse().map_err(|e| format!("{e}"))?,
            hmac: self.hmac.parse().map_err(|e| format!("{e}"))?,
            iv_rule: self.iv_rule.parse().map_err(|e| format!("{e}"))?,
            page_size: self.page_size,
            reserve_size: self.reserve_size,
            ..CipherParams::default()
        })
    }

    fn codec(&self) -> Result<CipherCodec, String> {
        let salt = hex::decode(&self.salt_hex).map_err(|e| e.to_string())?;
        let key = hex::decode(&self.key_hex).map_err(|e| e.to_string())?;
        let salt = Salt::from_bytes(&salt).map_err(|e| e.to_string())?;
        let header = CodecHeader::new(self.params()?, salt);
        CipherCodec::derive(header, &KeyMaterial::raw(key)).map_err(|e| e.to_string())
    }
}

fn vector_codec(params: CipherParams) -> CipherCodec {
    let salt = Salt::from_bytes(&VECTOR_SALT).expect("Invalid vector salt");
    CipherCodec::derive(
        CodecHeader::new(params, salt),
        &KeyMaterial::raw(VECTOR_KEY.to_vec()),
    )
    .expect("Failed to build vector codec")
}

fn vector_page(codec: &CipherCodec, pgno: PageNumber) -> Vec<u8> {
    let mut page = vec![0u8; codec.page_size()];
    if pgno.is_first() {
        page[..HEADER_SIZE].copy_from_slice(&codec.header().encode());
    }
    for (i, byte) in page[codec.data_range(pgno)].iter_mut().enumerate() {
        *byte = (i % 256) as u8;
    }
    page
}

/// Generates vectors for every cipher and MAC pairing, for page 1 and an
/// ordinary page. CBC pins page-derived IVs; CTR needs a fresh IV per write.
pub fn codec_vectors() -> Vec<CodecVector> {
    let pipelines = [
        (CipherAlgorithm::Aes256Cbc, IvRule::PageDerived),
        (CipherAlgorithm::Aes256Ctr, IvRule::RandomPerWrite),
    ];
    let macs = [
        HmacAlgorithm::HmacSha1,
        HmacAlgorithm::HmacSha256,
        HmacAlgorithm::HmacSha512,
    ];

    let mut vectors = Vec::new();
    for (cipher, iv_rule) in pipelines {
        for hmac in macs {
            let params = CipherParams {
                cipher,
                hmac,
                iv_rule,
                page_size: 512,
                reserve_size: CipherParams::required_reserve(hmac, iv_rule) as u8,
                ..CipherParams::default()
            };
            let codec = vector_codec(params);
            for pgno in [PageNumber::FIRST, PageNumber::new(7)] {
                let plain = vector_page(&codec, pgno);
                let encoded = codec
                    .encode_page(pgno, &plain)
                    .expect("Failed to encode vector page");
                vectors.push(CodecVector {
                    id: format!("{cipher}_{hmac}_page{}", pgno.as_u32()),
                    cipher: cipher.to_string(),
                    hmac: hmac.to_string(),
                    iv_rule: iv_rule.to_string(),
                    page_size: params.page_size,
                    reserve_size: params.reserve_size,
                    key_hex: hex::encode(VECTOR_KEY),
                    salt_hex: hex::encode(VECTOR_SALT),
                    pgno: pgno.as_u32(),
                    plain_hex: hex::encode(&plain),
                    encoded_hex: hex::encode(&encoded),
                });
            }
        }
    }
    vectors
}

/// Checks that `vector` decodes back to its plain image and, for
/// page-derived IVs, that it still encodes to the pinned image.
pub fn check_vector(vector: &CodecVector) -> Result<(), String> {
    let codec = vector.codec()?;
    let pgno = PageNumber::new(vector.pgno);
    let plain = hex::decode(&vector.plain_hex).map_err(|e| e.to_string())?;
    let encoded = hex::decode(&vector.encoded_hex).map_err(|e| e.to_string())?;

    if codec.params().iv_rule == IvRule::PageDerived {
        let fresh = codec.encode_page(pgno, &plain).map_err(|e| e.to_string())?;
        if fresh != encoded {
            return Err(format!("{}: encoding changed", vector.id));
        }
    }
    let decoded = codec.decode_page(pgno, &encoded).map_err(|e| e.to_string())?;
    if decoded != plain {
        return Err(format!("{}: decoded page differs", vector.id));
    }
    Ok(())
}

/// Serializes vectors as pretty JSON.
pub fn vectors_to_json(vectors: &[CodecVector]) -> String {
    serde_json::to_string_pretty(vectors).expect("Failed to serialize vectors")
}

/// Parses vectors from JSON.
pub fn vectors_from_json(json: &str) -> Result<Vec<CodecVector>, serde_json::Error> {
    serde_json::from_str(json)
}
