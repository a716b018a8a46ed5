//! Show cache and queue status.

use anyhow::{Context, Result};
use engage_assets::{AssetStore, DiskStore};
use engage_client::{Config, EventQueue};
use engage_core::{Clock, SystemClock};
use engage_types::Timestamp;
use std::sync::Arc;

/// Run the status command.
pub async fn run(config: &Config) -> Result<()> {
    println!("=== engage-cli status ===");
    println!();

    let assets_dir = config.storage.assets_dir();
    let store = DiskStore::open(&assets_dir)
        .await
        .with_context(|| format!("Failed to open asset cache {}", assets_dir.display()))?;

    println!("Asset cache:");
    println!("  Path:   {}", assets_dir.display());
    println!("  Assets: {}", store.snapshot().len());
    println!();

    let clock = Arc::new(SystemClock);
    let queue = EventQueue::open(
        config.storage.events_dir(),
        config.events.queue_options(),
        clock.clone(),
    )
    .await
    .context("Failed to open event queue")?;

    let pending = queue.pending_events().await;
    println!("Event queue:");
    println!("  Path:          {}", queue.dir().display());
    println!("  Pending:       {}", pending.len());
    println!("  Acked through: {}", queue.acked_through().await.value());
    println!("  Next seqnum:   {}", queue.next_sequence().await.value());
    if let Some(oldest) = pending.first() {
        println!("  Oldest:        {}", format_age(oldest.timestamp, clock.now()));
    }
    println!();

    println!("Delivery:");
    if config.events.endpoint.is_empty() {
        println!("  Endpoint: NOT CONFIGURED");
    } else {
        println!("  Endpoint: {}", config.events.endpoint);
    }

    Ok(())
}

/// Format the age of `then` relative to `now`.
fn format_age(then: Timestamp, now: Timestamp) -> String {
    let diff = now.as_millis().saturating_sub(then.as_millis()) / 1000;

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn status_on_empty_data_dir() {
        let dir = tempdir().unwrap();

        let result = run(&config(dir.path())).await;
        assert!(result.is_ok());
        assert!(dir.path().join("assets").is_dir());
    }

    #[tokio::test]
    async fn status_with_pending_events() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        {
            let queue = EventQueue::open(
                config.storage.events_dir(),
                config.events.queue_options(),
                Arc::new(SystemClock),
            )
            .await
            .unwrap();
            queue
                .enqueue("event", Default::default(), Default::default())
                .await
                .unwrap();
        }

        assert!(run(&config).await.is_ok());
    }

    #[test]
    fn format_age_works() {
        let now = Timestamp::from_millis(1_000_000_000);
        let ago = |secs: u64| Timestamp::from_millis(now.as_millis() - secs * 1000);

        assert_eq!(format_age(now, now), "just now");
        assert!(format_age(ago(120), now).contains("minutes"));
        assert!(format_age(ago(7200), now).contains("hours"));
        assert!(format_age(ago(172_800), now).contains("days"));
    }
}
