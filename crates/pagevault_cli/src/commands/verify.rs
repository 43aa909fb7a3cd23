//! Verify command implementation.

use pagevault_core::IntegrityReport;
use serde::Serialize;
use std::path::Path;

use super::open_keyed;

/// Verification result.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    /// Database path.
    pub path: String,
    /// Per-page authentication results.
    #[serde(flatten)]
    pub report: IntegrityReport,
}

/// Runs the verify command.
pub fn run(path: &Path, key: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = verify(path, key)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Verifying database at {:?}", path);
            println!();
            println!("  Pages checked: {}", result.report.pages_checked);
            for page in &result.report.failed_pages {
                println!("    - page {page} failed authentication");
            }
            println!();
        }
    }

    if result.report.is_ok() {
        if format != "json" {
            println!("✓ Database verification passed");
        }
        Ok(())
    } else {
        if format != "json" {
            println!("✗ Database verification failed");
        }
        Err("Verification failed".into())
    }
}

/// Unlocks `path` with `key` and authenticates every page.
pub fn verify(path: &Path, key: &str) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let db = open_keyed(path, key)?;
    let report = db.integrity_check()?;
    Ok(VerifyResult {
        path: path.display().to_string(),
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagevault_core::{CodecConfig, Database};
    use tempfile::tempdir;

    fn create(path: &Path, key: &str, pages: u32) {
        let mut db =
            Database::open(path, CodecConfig::new().page_size(1024).kdf_iterations(2)).unwrap();
        db.set_key(key).unwrap();
        for _ in 1..pages {
            db.allocate_page().unwrap();
        }
    }

    #[test]
    fn clean_database_verifies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clean.db");
        create(&path, "k", 3);

        let result = verify(&path, "k").unwrap();
        assert_eq!(result.report.pages_checked, 3);
        assert!(result.report.is_ok());
    }

    #[test]
    fn damaged_page_is_listed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("damaged.db");
        create(&path, "k", 3);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[1024 + 200] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();

        let result = verify(&path, "k").unwrap();
        assert_eq!(result.report.failed_pages, vec![2]);
    }

    #[test]
    fn wrong_key_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyed.db");
        create(&path, "k", 1);
        assert!(verify(&path, "not-k").is_err());
    }
}
