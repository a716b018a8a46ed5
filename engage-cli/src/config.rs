//! Configuration and payload loading for engage-cli.

use anyhow::{Context, Result};
use engage_client::Config;
use engage_types::CampaignPayload;
use std::path::{Path, PathBuf};

/// Load the engage configuration.
///
/// Without `--config` the defaults are used. `--data-dir` overrides the
/// configured storage root; otherwise a relative default is replaced by the
/// platform data directory.
pub fn load(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match data_dir {
        Some(dir) => config.storage.data_dir = dir,
        None if config_path.is_none() => config.storage.data_dir = default_data_dir()?,
        None => {}
    }

    config.validate()?;
    tracing::debug!("Using data directory {}", config.storage.data_dir.display());
    Ok(config)
}

/// Read a campaign payload (server sync response) from a JSON file.
pub async fn load_payload(path: &Path) -> Result<CampaignPayload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read payload {}", path.display()))?;
    CampaignPayload::from_json(&bytes)
        .with_context(|| format!("Invalid campaign payload {}", path.display()))
}

/// Get the default data directory for engage-cli.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "engage", "engage-cli")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
