//! Rekey command implementation.

use pagevault_core::KeyMaterial;
use std::path::Path;
use tracing::info;

use super::open_keyed;

/// Runs the rekey command.
pub fn run(path: &Path, key: &str, new_key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_keyed(path, key)?;
    let pages = db.page_count()?;

    info!("Rekeying {} pages in {:?}", pages, path);
    db.rekey(KeyMaterial::parse(new_key)?)?;
    db.close()?;

    println!("✓ Rekeyed {pages} pages");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagevault_core::{CodecConfig, Database};
    use tempfile::tempdir;

    #[test]
    fn rekey_switches_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rekey.db");
        {
            let mut db =
                Database::open(&path, CodecConfig::new().page_size(1024).kdf_iterations(2))
                    .unwrap();
            db.set_key("old").unwrap();
        }

        run(&path, "old", "new").unwrap();

        assert!(open_keyed(&path, "old").is_err());
        assert!(open_keyed(&path, "new").is_ok());
    }
}
