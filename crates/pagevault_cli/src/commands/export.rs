//! Export command implementation.

use pagevault_core::{CipherAlgorithm, CipherParams, CodecConfig, IvRule, KeyMaterial};
use std::path::Path;
use tracing::info;

use super::open_keyed;

/// Cipher overrides for the destination file. `None` keeps the source's.
#[derive(Debug, Default)]
pub struct ExportOptions {
    /// Key for the destination.
    pub new_key: Option<String>,
    /// Cipher name.
    pub cipher: Option<String>,
    /// HMAC name.
    pub hmac: Option<String>,
    /// KDF name.
    pub kdf: Option<String>,
    /// KDF iterations.
    pub kdf_iterations: Option<u32>,
    /// IV rule name.
    pub iv_rule: Option<String>,
}

impl ExportOptions {
    /// Builds the destination configuration. Page and reserve size stay
    /// those of the source so every page keeps its capacity. Switching to a
    /// stream cipher without naming an IV rule selects random IVs.
    pub fn config_for(
        &self,
        source: &CipherParams,
    ) -> Result<CodecConfig, Box<dyn std::error::Error>> {
        let cipher: CipherAlgorithm = match &self.cipher {
            Some(name) => name.parse()?,
            None => source.cipher,
        };
        let iv_rule = match &self.iv_rule {
            Some(name) => name.parse()?,
            None if cipher.requires_fresh_iv() => IvRule::RandomPerWrite,
            None => source.iv_rule,
        };

        let mut config = CodecConfig::new()
            .page_size(source.page_size)
            .reserve_size(source.reserve_size)
            .kdf_iterations(self.kdf_iterations.unwrap_or(source.kdf_iterations))
            .cipher(cipher)
            .hmac(source.hmac)
            .kdf(source.kdf)
            .iv_rule(iv_rule);

        if let Some(hmac) = &self.hmac {
            config = config.hmac(hmac.parse()?);
        }
        if let Some(kdf) = &self.kdf {
            config = config.kdf(kdf.parse()?);
        }

        config.cipher_params()?;
        Ok(config)
    }
}

/// Runs the export command.
pub fn run(
    path: &Path,
    key: &str,
    output: &Path,
    options: &ExportOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if output.exists() {
        return Err(format!("Destination {:?} already exists", output).into());
    }

    let source = open_keyed(path, key)?;
    let config = options.config_for(source.params())?;
    let target_key = KeyMaterial::parse(options.new_key.as_deref().unwrap_or(key))?;

    info!("Exporting {:?} to {:?}", path, output);
    source.export(output, target_key, config)?;

    println!("✓ Exported {} pages to {:?}", source.page_count()?, output);
    Ok(())
}
