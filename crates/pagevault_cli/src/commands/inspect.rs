//! Inspect command implementation.

use pagevault_core::{journal_path, CodecHeader, HEADER_SIZE};
use pagevault_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;

/// Header inspection result. Everything here is readable without a key.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Format version.
    pub format_version: u8,
    /// Page cipher.
    pub cipher: String,
    /// Page MAC.
    pub hmac: String,
    /// Passphrase KDF.
    pub kdf: String,
    /// KDF iteration count.
    pub kdf_iterations: u32,
    /// IV rule.
    pub iv_rule: String,
    /// Page size in bytes.
    pub page_size: u32,
    /// Reserved bytes per page.
    pub reserve_size: u8,
    /// Whole pages in the file.
    pub page_count: u64,
    /// Hex-encoded salt.
    pub salt: String,
    /// Size of a leftover rollback journal, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hot_journal_size: Option<u64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Reads the header of `path` without unlocking it.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No database found at {:?}", path).into());
    }

    let backend = FileBackend::open(path)?;
    let file_size = backend.size()?;
    if file_size < HEADER_SIZE as u64 {
        return Err(format!("{:?} is too short to be a PageVault database", path).into());
    }
    let header = CodecHeader::decode(&backend.read_at(0, HEADER_SIZE)?)?;
    let params = header.params;

    let journal = journal_path(path);
    let hot_journal_size = std::fs::metadata(&journal)
        .ok()
        .map(|meta| meta.len())
        .filter(|&len| len > 0);

    Ok(InspectResult {
        path: path.display().to_string(),
        file_size,
        format_version: pagevault_core::params::FORMAT_VERSION,
        cipher: params.cipher.to_string(),
        hmac: params.hmac.to_string(),
        kdf: params.kdf.to_string(),
        kdf_iterations: params.kdf_iterations,
        iv_rule: params.iv_rule.to_string(),
        page_size: params.page_size,
        reserve_size: params.reserve_size,
        page_count: file_size / u64::from(params.page_size),
        salt: hex::encode(header.salt.as_bytes()),
        hot_journal_size,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("PageVault Database: {}", result.path);
    println!("═══════════════════════════════════════");
    println!();
    println!("Header:");
    println!("  Format version:  {}", result.format_version);
    println!("  Cipher:          {}", result.cipher);
    println!("  HMAC:            {}", result.hmac);
    println!("  KDF:             {} ({} iterations)", result.kdf, result.kdf_iterations);
    println!("  IV rule:         {}", result.iv_rule);
    println!("  Salt:            {}", result.salt);
    println!();
    println!("Layout:");
    println!("  Page size:       {} bytes", result.page_size);
    println!("  Reserve:         {} bytes/page", result.reserve_size);
    println!("  Pages:           {}", result.page_count);
    println!("  File size:       {} bytes", result.file_size);
    if let Some(size) = result.hot_journal_size {
        println!();
        println!("⚠ Rollback journal present ({size} bytes); it is replayed on next open");
    }
}
