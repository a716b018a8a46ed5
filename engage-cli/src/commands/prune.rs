//! Remove cached assets no campaign in a payload references.

use anyhow::{Context, Result};
use engage_assets::{AssetStore, DiskStore, PruneReport};
use engage_client::Config;
use engage_core::EligibilityEngine;
use engage_types::CampaignPayload;
use std::path::Path;

use crate::config::load_payload;

/// Run the prune command.
pub async fn run(config: &Config, payload_path: &Path) -> Result<()> {
    let payload = load_payload(payload_path).await?;
    let report = prune(config, payload).await?;

    println!("Removed {} assets", report.removed.len());
    for digest in &report.failed {
        println!("  could not remove {}", digest);
    }
    Ok(())
}

async fn prune(config: &Config, payload: CampaignPayload) -> Result<PruneReport> {
    let store = DiskStore::open(config.storage.assets_dir())
        .await
        .context("Failed to open asset cache")?;

    let mut engine = EligibilityEngine::new();
    engine.load_generation(payload.campaigns);
    Ok(store.prune(&engine.required_digests()).await)
}
