use std::path::{Path, PathBuf};

use log::{debug, info};

use super::ComposeError;
use crate::model::env::CompositionConfig;

pub const FINGERPRINT_FILE: &str = "envfetch.fingerprint.toml";

pub fn fingerprint_path(cache_root: &Path) -> PathBuf {
    cache_root.join(FINGERPRINT_FILE)
}

/// Records the configuration a completed setup was built from. Written only
/// after every stage succeeded; its presence is the sole signal that a
/// complete, consistent environment exists.
pub fn write(cache_root: &Path, config: &CompositionConfig) -> Result<(), ComposeError> {
    let path = fingerprint_path(cache_root);
    std::fs::write(&path, config.to_toml_string()?)?;
    info!("Recorded environment fingerprint at {}", path.display());
    Ok(())
}

/// Gate for the build-and-test entry point: the current configuration must
/// be structurally equal to the recorded one. Comparison is on parsed
/// records, so formatting differences do not invalidate an environment.
pub fn validate(cache_root: &Path, config: &CompositionConfig) -> Result<(), ComposeError> {
    let path = fingerprint_path(cache_root);
    if !path.exists() {
        return Err(ComposeError::FingerprintMissing { path });
    }
    let recorded = CompositionConfig::from_file(&path)?;
    if &recorded != config {
        return Err(ComposeError::FingerprintMismatch);
    }
    debug!("Environment fingerprint matches the current configuration");
    Ok(())
}
