//! Enqueue an event without delivering it.

use anyhow::{Context, Result};
use engage_client::{Config, EventQueue};
use engage_core::SystemClock;
use engage_types::Attributes;
use std::sync::Arc;

/// Run the track command.
pub async fn run(config: &Config, event_type: &str, parameters: &[String], payload: &[String]) -> Result<()> {
    let parameters = parse_pairs(parameters)?;
    let payload = parse_pairs(payload)?;

    let queue = EventQueue::open(
        config.storage.events_dir(),
        config.events.queue_options(),
        Arc::new(SystemClock),
    )
    .await
    .context("Failed to open event queue")?;

    let seq = queue
        .enqueue(event_type, parameters, payload)
        .await
        .context("Failed to enqueue event")?;

    println!("Queued {} event as seqnum {}", event_type, seq);
    println!("  Pending: {}", queue.len().await);
    Ok(())
}

/// Parse `key=value` arguments. Values that are valid JSON keep their type;
/// anything else is taken as a string.
fn parse_pairs(pairs: &[String]) -> Result<Attributes> {
    let mut attributes = Attributes::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Expected key=value, got '{}'", pair))?;
        if key.is_empty() {
            anyhow::bail!("Empty key in '{}'", pair);
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        attributes.insert(key.to_string(), value);
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_pairs_keeps_order_and_types() {
        let parsed = parse_pairs(&args(&["screen=home", "count=3", "flag=true", "empty="])).unwrap();

        let keys: Vec<&str> = parsed.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["screen", "count", "flag", "empty"]);
        assert_eq!(parsed["screen"], json!("home"));
        assert_eq!(parsed["count"], json!(3));
        assert_eq!(parsed["flag"], json!(true));
        assert_eq!(parsed["empty"], json!(""));
    }

    #[test]
    fn parse_pairs_rejects_malformed() {
        assert!(parse_pairs(&args(&["novalue"])).is_err());
        assert!(parse_pairs(&args(&["=value"])).is_err());
    }

    #[tokio::test]
    async fn track_persists_event() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();

        run(&config, "purchase", &args(&["sku=abc"]), &[]).await.unwrap();
        run(&config, "event", &[], &args(&["n=1"])).await.unwrap();

        let queue = EventQueue::open(
            config.storage.events_dir(),
            config.events.queue_options(),
            Arc::new(SystemClock),
        )
        .await
        .unwrap();
        let events = queue.pending_events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "purchase");
        assert_eq!(events[0].parameters["sku"], json!("abc"));
        assert_eq!(events[1].payload["n"], json!(1));
    }
}
