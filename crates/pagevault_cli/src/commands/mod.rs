//! CLI command implementations.

pub mod export;
pub mod inspect;
pub mod rekey;
pub mod verify;

use pagevault_core::{CodecConfig, Database, KeyMaterial};
use std::path::Path;

/// Opens an existing database and unlocks it with `key`.
pub fn open_keyed(path: &Path, key: &str) -> Result<Database, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No database found at {:?}", path).into());
    }
    let mut db = Database::open(path, CodecConfig::default().create_if_missing(false))?;
    db.set_key(KeyMaterial::parse(key)?)?;
    Ok(db)
}
