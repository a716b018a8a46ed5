//! Evaluate campaign eligibility against the local asset cache.

use anyhow::{Context, Result};
use engage_assets::{AssetStore, DiskStore};
use engage_client::Config;
use engage_core::{Clock, EligibilityEngine, Ineligibility, SystemClock};
use engage_types::Timestamp;
use std::path::Path;

use crate::config::load_payload;

/// Run the evaluate command.
///
/// `at` overrides the evaluation time in milliseconds since the epoch.
pub async fn run(config: &Config, payload_path: &Path, at: Option<u64>) -> Result<()> {
    let payload = load_payload(payload_path).await?;
    let store = DiskStore::open(config.storage.assets_dir())
        .await
        .context("Failed to open asset cache")?;

    let now = at.map_or_else(|| SystemClock.now(), Timestamp::from_millis);
    let mut engine = EligibilityEngine::new();
    engine.load_generation(payload.campaigns);

    println!("Evaluated at {}", now);
    for (id, reason) in engine.explain(now, &store.snapshot()) {
        println!("  campaign {:>8}  {}", id, describe(reason.as_ref()));
    }

    Ok(())
}

/// One-line explanation of a campaign's eligibility.
pub(crate) fn describe(reason: Option<&Ineligibility>) -> String {
    match reason {
        None => "ELIGIBLE".to_string(),
        Some(Ineligibility::NotStarted { starts_at }) => format!("not started (opens at {})", starts_at),
        Some(Ineligibility::Ended { ended_at }) => format!("ended (closed at {})", ended_at),
        Some(Ineligibility::MissingAssets { missing }) => {
            let names: Vec<&str> = missing.iter().map(|a| a.name.as_str()).collect();
            format!("missing assets: {}", names.join(", "))
        }
    }
}
