//! Apply a campaign payload: download its assets and report eligibility.

use anyhow::{Context, Result};
use engage_assets::ReconcileReport;
use engage_client::{Config, Session};
use engage_core::SystemClock;
use std::path::Path;
use std::sync::Arc;

use super::evaluate::describe;
use crate::config::load_payload;
use crate::http::{HttpDownloader, HttpTransport};

/// Run the sync command.
pub async fn run(config: Config, payload_path: &Path, prune: bool) -> Result<()> {
    let payload = load_payload(payload_path).await?;
    let campaigns = payload.campaigns.len();

    let downloader = HttpDownloader::new().context("Failed to build HTTP client")?;
    let transport =
        HttpTransport::new(config.events.endpoint.clone()).context("Failed to build HTTP client")?;
    let session = Session::init(config, downloader, transport, Arc::new(SystemClock))
        .await
        .context("Failed to start session")?;

    println!("Applying {} campaigns...", campaigns);
    let report = session.apply_campaigns(payload).wait().await;
    print_report(&report);

    if prune {
        let pruned = session.prune_assets().await;
        println!(
            "Pruned {} assets ({} could not be removed)",
            pruned.removed.len(),
            pruned.failed.len()
        );
    }

    let eligible = session.eligible_campaigns();
    println!();
    println!("Generation {}:", eligible.generation().value());
    for (id, reason) in session.explain_campaigns() {
        println!("  campaign {:>8}  {}", id, describe(reason.as_ref()));
    }

    session.shutdown().await;

    if !report.is_success() {
        anyhow::bail!("{} assets failed to download", report.failed.len());
    }
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    println!("  Already cached: {}", report.already_present);
    println!("  Downloaded:     {}", report.succeeded.len());
    println!("  Failed:         {}", report.failed.len());
    for (asset, failure) in &report.failed {
        println!("    {} ({}): {}", asset.name, asset.digest, failure);
    }
}
