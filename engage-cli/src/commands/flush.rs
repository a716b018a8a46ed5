//! Deliver queued events to the collection endpoint.

use anyhow::{Context, Result};
use engage_client::{Config, FlushOutcome, Session};
use engage_core::SystemClock;
use std::sync::Arc;
use std::time::Duration;

use crate::http::{HttpDownloader, HttpTransport};

/// Run the flush command.
///
/// Sends batches until the queue is drained or a delivery fails.
pub async fn run(config: Config) -> Result<()> {
    if config.events.endpoint.is_empty() {
        anyhow::bail!("No collection endpoint configured (events.endpoint)");
    }

    let downloader = HttpDownloader::new().context("Failed to build HTTP client")?;
    let transport =
        HttpTransport::new(config.events.endpoint.clone()).context("Failed to build HTTP client")?;
    let session = Session::init(config, downloader, transport, Arc::new(SystemClock))
        .await
        .context("Failed to start session")?;

    let mut delivered = 0;
    let result = loop {
        match session.flush().await {
            FlushOutcome::Delivered { count, through } => {
                delivered += count;
                println!("Delivered {} events (through seqnum {})", count, through);
            }
            FlushOutcome::Idle => break Ok(()),
            // The background task is sending; let it finish.
            FlushOutcome::Coalesced => tokio::time::sleep(Duration::from_millis(50)).await,
            FlushOutcome::Failed { error, retry_in } => {
                break Err(anyhow::anyhow!(
                    "Delivery failed: {} (next retry in {:?})",
                    error,
                    retry_in
                ));
            }
        }
    };

    println!("Delivered {} events, {} still pending", delivered, session.queue().len().await);
    session.shutdown().await;
    result
}
