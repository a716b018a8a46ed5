//! Durable outbound event queue.
//!
//! [`EventQueue`] pairs the in-memory ordering rules of
//! [`PendingEvents`](engage_core::PendingEvents) with the on-disk
//! [`EventLog`]. Every mutation is persisted before it becomes visible:
//!
//! - `enqueue` appends and syncs the record, then commits it in memory
//! - `ack_through` persists the ack marker, then drops the prefix in memory
//!
//! A crash between the two steps therefore never loses an event; at worst a
//! delivered prefix is sent again.

mod log;

pub use log::{EventLog, Recovered};
pub(crate) use log::write_atomic;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use engage_core::{Batch, BatchLimits, Clock, PendingEvents};
use engage_types::{Attributes, EventRecord, SequenceNumber, TypesError};
use thiserror::Error;
use tokio::sync::Mutex;

/// Event queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Filesystem operation on the log failed.
    #[error("event log I/O error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Record could not be encoded.
    #[error("record encoding failed: {0}")]
    Encode(#[from] TypesError),

    /// An earlier append failed and could not be rolled back.
    #[error("event log {path} is unusable after a failed append")]
    Poisoned {
        /// The log file.
        path: PathBuf,
    },

    /// Encoded record exceeds the frame size limit.
    #[error("record of {len} bytes is too large for the event log")]
    RecordTooLarge {
        /// Encoded size.
        len: usize,
    },
}

/// Sizing of the durable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Pending events kept before the oldest are evicted.
    pub max_queued_events: usize,
    /// Acknowledged records tolerated in the log before it is compacted.
    pub compact_threshold: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_queued_events: 10_000,
            compact_threshold: 1_000,
        }
    }
}

struct QueueState {
    log: EventLog,
    pending: PendingEvents,
}

/// Ordered, durable sequence of events awaiting delivery.
pub struct EventQueue {
    state: Mutex<QueueState>,
    clock: Arc<dyn Clock>,
    options: QueueOptions,
    dir: PathBuf,
}

impl EventQueue {
    /// Open the queue stored in `dir`, recovering any pending events.
    pub async fn open(
        dir: impl Into<PathBuf>,
        options: QueueOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        let dir = dir.into();
        let (log, recovered) = EventLog::open(&dir).await?;
        let pending = PendingEvents::restore(
            options.max_queued_events,
            recovered.records,
            recovered.acked_through,
        );

        Ok(Self {
            state: Mutex::new(QueueState { log, pending }),
            clock,
            options,
            dir,
        })
    }

    /// Directory holding the queue files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append an event and return its sequence number.
    ///
    /// The event is on disk when this returns. If the queue is full the
    /// oldest pending events are evicted to make room.
    pub async fn enqueue(
        &self,
        event_type: &str,
        parameters: Attributes,
        payload: Attributes,
    ) -> Result<SequenceNumber, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let record = state.pending.prepare(event_type, now, parameters, payload);
        let sequence = record.sequence;
        state.log.append(&record).await?;

        let evicted = state.pending.commit(record);
        if let Some(last) = evicted.last() {
            tracing::warn!(
                "Event queue full ({} events); evicted {} oldest through {:?}",
                self.options.max_queued_events,
                evicted.len(),
                last.sequence
            );
            // The event itself is stored; a stale marker only means the
            // evicted events are sent again after a restart
            let acked = state.pending.acked_through();
            match state.log.persist_ack(acked).await {
                Ok(()) => self.maybe_compact(&mut state).await,
                Err(e) => tracing::warn!("Failed to persist eviction marker: {}", e),
            }
        }

        tracing::debug!("Enqueued {} as {:?}", event_type, sequence);
        Ok(sequence)
    }

    /// Copy the oldest pending prefix that fits within `limits`.
    pub async fn select_batch(&self, limits: BatchLimits) -> Option<Batch> {
        self.state.lock().await.pending.select_batch(limits)
    }

    /// Mark everything up to and including `last` as delivered.
    ///
    /// Returns the number of events removed.
    pub async fn ack_through(&self, last: SequenceNumber) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;
        if last <= state.pending.acked_through() {
            return Ok(0);
        }

        state.log.persist_ack(last).await?;
        let removed = state.pending.ack_through(last);
        self.maybe_compact(&mut state).await;
        Ok(removed)
    }

    async fn maybe_compact(&self, state: &mut QueueState) {
        let acknowledged = state.log.records_in_log().saturating_sub(state.pending.len());
        if acknowledged <= self.options.compact_threshold {
            return;
        }

        let QueueState { log, pending } = state;
        if let Err(e) = log.compact(pending.iter()).await {
            // The uncompacted log is still correct, only larger
            tracing::warn!("Event log compaction failed: {}", e);
        }
    }

    /// Number of pending events.
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Check if nothing is pending.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }

    /// The sequence number the next event will receive.
    pub async fn next_sequence(&self) -> SequenceNumber {
        self.state.lock().await.pending.next_sequence()
    }

    /// Highest acknowledged (or evicted) sequence number.
    pub async fn acked_through(&self) -> SequenceNumber {
        self.state.lock().await.pending.acked_through()
    }

    /// Copy of every pending event, oldest first.
    pub async fn pending_events(&self) -> Vec<EventRecord> {
        self.state.lock().await.pending.iter().cloned().collect()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("dir", &self.dir)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engage_core::ManualClock;
    use engage_types::Timestamp;
    use serde_json::json;
    use tempfile::TempDir;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(Timestamp::from_millis(1_000)))
    }

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn open(dir: &TempDir, options: QueueOptions) -> EventQueue {
        EventQueue::open(dir.path(), options, clock()).await.unwrap()
    }

    #[tokio::test]
    async fn enqueue_assigns_increasing_sequences() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir, QueueOptions::default()).await;

        let first = queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
        let second = queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();

        assert_eq!(first, SequenceNumber::new(1));
        assert_eq!(second, SequenceNumber::new(2));
        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.next_sequence().await, SequenceNumber::new(3));
    }

    #[tokio::test]
    async fn reopen_yields_same_content_and_order() {
        let dir = TempDir::new().unwrap();
        let before = {
            let queue = open(&dir, QueueOptions::default()).await;
            queue
                .enqueue(
                    "purchase",
                    attrs(&[("price", json!(9.99)), ("currency", json!("EUR"))]),
                    attrs(&[("sku", json!("a-1"))]),
                )
                .await
                .unwrap();
            queue
                .enqueue("event", attrs(&[("name", json!("open"))]), Attributes::new())
                .await
                .unwrap();
            queue.pending_events().await
        };

        let reopened = open(&dir, QueueOptions::default()).await;
        let after = reopened.pending_events().await;

        assert_eq!(after, before);
        let keys: Vec<&str> = after[0].parameters.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["price", "currency"]);
        assert_eq!(reopened.next_sequence().await, SequenceNumber::new(3));
    }

    #[tokio::test]
    async fn ack_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let queue = open(&dir, QueueOptions::default()).await;
            for _ in 0..5 {
                queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
            }
            assert_eq!(queue.ack_through(SequenceNumber::new(3)).await.unwrap(), 3);
        }

        let reopened = open(&dir, QueueOptions::default()).await;
        let sequences: Vec<u64> = reopened
            .pending_events()
            .await
            .iter()
            .map(|e| e.sequence.value())
            .collect();
        assert_eq!(sequences, vec![4, 5]);
        assert_eq!(reopened.next_sequence().await, SequenceNumber::new(6));
    }

    #[tokio::test]
    async fn sequences_are_not_reused_after_everything_is_acked() {
        let dir = TempDir::new().unwrap();
        {
            let queue = open(&dir, QueueOptions::default()).await;
            queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
            queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
            queue.ack_through(SequenceNumber::new(2)).await.unwrap();
        }

        let reopened = open(&dir, QueueOptions::default()).await;
        assert!(reopened.is_empty().await);
        let next = reopened.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
        assert_eq!(next, SequenceNumber::new(3));
    }

    #[tokio::test]
    async fn full_queue_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let options = QueueOptions {
            max_queued_events: 3,
            compact_threshold: 100,
        };
        {
            let queue = open(&dir, options).await;
            for _ in 0..5 {
                queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
            }
            assert_eq!(queue.len().await, 3);
            assert_eq!(queue.acked_through().await, SequenceNumber::new(2));
        }

        // Eviction is durable
        let reopened = open(&dir, options).await;
        let first = reopened.pending_events().await[0].sequence;
        assert_eq!(first, SequenceNumber::new(3));
    }

    #[tokio::test]
    async fn acknowledged_records_are_compacted_away() {
        let dir = TempDir::new().unwrap();
        let options = QueueOptions {
            max_queued_events: 100,
            compact_threshold: 2,
        };
        let queue = open(&dir, options).await;
        for _ in 0..6 {
            queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
        }

        queue.ack_through(SequenceNumber::new(2)).await.unwrap();
        assert_eq!(queue.state.lock().await.log.records_in_log(), 6);

        queue.ack_through(SequenceNumber::new(5)).await.unwrap();
        assert_eq!(queue.state.lock().await.log.records_in_log(), 1);

        drop(queue);
        let reopened = open(&dir, options).await;
        assert_eq!(reopened.len().await, 1);
        assert_eq!(reopened.next_sequence().await, SequenceNumber::new(7));
    }

    #[tokio::test]
    async fn stale_ack_is_ignored() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir, QueueOptions::default()).await;
        for _ in 0..3 {
            queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
        }
        queue.ack_through(SequenceNumber::new(2)).await.unwrap();

        assert_eq!(queue.ack_through(SequenceNumber::new(1)).await.unwrap(), 0);
        assert_eq!(queue.len().await, 1);
    }

    fn sequences(events: &[EventRecord]) -> Vec<u64> {
        events.iter().map(|e| e.sequence.value()).collect()
    }

    #[tokio::test]
    async fn failed_append_does_not_hide_later_events() {
        let dir = TempDir::new().unwrap();
        {
            let queue = open(&dir, QueueOptions::default()).await;
            queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();

            // Disk fills up halfway through the second frame
            queue.state.lock().await.log.inject_fault(log::Fault {
                written: 5,
                rollback_fails: false,
            });
            let failed = queue.enqueue("event", Attributes::new(), Attributes::new()).await;
            assert!(matches!(failed, Err(QueueError::Io { .. })));
            assert_eq!(queue.len().await, 1);

            let second = queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
            let third = queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
            assert_eq!(second, SequenceNumber::new(2));
            assert_eq!(third, SequenceNumber::new(3));
        }

        let reopened = open(&dir, QueueOptions::default()).await;
        assert_eq!(sequences(&reopened.pending_events().await), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_sync_after_full_frame_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        {
            let queue = open(&dir, QueueOptions::default()).await;
            queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();

            queue.state.lock().await.log.inject_fault(log::Fault {
                written: usize::MAX,
                rollback_fails: false,
            });
            assert!(queue
                .enqueue("lost", Attributes::new(), Attributes::new())
                .await
                .is_err());

            queue.enqueue("kept", Attributes::new(), Attributes::new()).await.unwrap();
        }

        let reopened = open(&dir, QueueOptions::default()).await;
        let events = reopened.pending_events().await;
        assert_eq!(sequences(&events), vec![1, 2]);
        assert_eq!(events[1].event_type, "kept");
    }

    #[tokio::test]
    async fn failed_rollback_refuses_further_appends() {
        let dir = TempDir::new().unwrap();
        {
            let queue = open(&dir, QueueOptions::default()).await;
            queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();

            queue.state.lock().await.log.inject_fault(log::Fault {
                written: 5,
                rollback_fails: true,
            });
            assert!(queue
                .enqueue("event", Attributes::new(), Attributes::new())
                .await
                .is_err());

            let refused = queue.enqueue("event", Attributes::new(), Attributes::new()).await;
            assert!(matches!(refused, Err(QueueError::Poisoned { .. })));
            assert_eq!(queue.len().await, 1);
        }

        // Recovery drops the torn frame and keeps what was stored
        let reopened = open(&dir, QueueOptions::default()).await;
        assert_eq!(sequences(&reopened.pending_events().await), vec![1]);
        let next = reopened.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
        assert_eq!(next, SequenceNumber::new(2));
    }

    #[tokio::test]
    async fn eviction_marker_failure_keeps_the_event() {
        let dir = TempDir::new().unwrap();
        let options = QueueOptions {
            max_queued_events: 2,
            compact_threshold: 100,
        };
        let queue = open(&dir, options).await;
        queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();
        queue.enqueue("event", Attributes::new(), Attributes::new()).await.unwrap();

        // The marker's temp file cannot be created
        std::fs::create_dir(dir.path().join(".events.ack.tmp")).unwrap();

        let third = queue.enqueue("event", Attributes::new(), Attributes::new()).await;
        assert_eq!(third.unwrap(), SequenceNumber::new(3));
        assert_eq!(sequences(&queue.pending_events().await), vec![2, 3]);
        assert_eq!(queue.next_sequence().await, SequenceNumber::new(4));
    }
}
