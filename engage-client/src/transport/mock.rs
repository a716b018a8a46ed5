//! Mock transport for testing.
//!
//! Allows queueing response statuses and capturing sent batches for
//! verification.

use super::{BatchResponse, Transport, TransportError};
use async_trait::async_trait;
use engage_types::BatchEnvelope;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;

/// Mock transport for testing.
///
/// Answers 200 unless a different status or failure was queued. Clones share
/// the same state.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    sent_batches: Vec<Vec<u8>>,
    status_queue: VecDeque<u16>,
    fail_next_send: Option<TransportError>,
    gate: Option<Arc<Semaphore>>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a status to be returned by the next `send_batch()` call.
    pub fn queue_status(&self, status: u16) {
        self.lock().status_queue.push_back(status);
    }

    /// Cause the next `send_batch()` to fail with the given error.
    pub fn fail_next_send(&self, error: TransportError) {
        self.lock().fail_next_send = Some(error);
    }

    /// Park every send until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.lock().gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` parked (or future) sends proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.lock().gate {
            gate.add_permits(n);
        }
    }

    /// Get every batch body that was sent, failed attempts included.
    pub fn sent_batches(&self) -> Vec<Vec<u8>> {
        self.lock().sent_batches.clone()
    }

    /// Get the last batch body that was sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.lock().sent_batches.last().cloned()
    }

    /// Decode every sent body as a [`BatchEnvelope`].
    ///
    /// Bodies that do not decode are skipped.
    pub fn sent_envelopes(&self) -> Vec<BatchEnvelope> {
        self.lock()
            .sent_batches
            .iter()
            .filter_map(|body| BatchEnvelope::from_json(body).ok())
            .collect()
    }

    /// Sequence numbers of every sent batch, one `Vec` per attempt.
    pub fn sent_sequences(&self) -> Vec<Vec<u64>> {
        self.sent_envelopes()
            .iter()
            .map(|envelope| envelope.sequences().iter().map(|s| s.value()).collect())
            .collect()
    }

    /// Clear all state (sent batches, queued statuses, failures).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_batch(&self, body: &[u8]) -> Result<BatchResponse, TransportError> {
        let gate = {
            let mut inner = self.lock();
            inner.sent_batches.push(body.to_vec());
            inner.gate.clone()
        };

        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(error);
        }

        let status = inner.status_queue.pop_front().unwrap_or(200);
        Ok(BatchResponse::new(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_records_batches() {
        let transport = MockTransport::new();

        transport.send_batch(b"batch 1").await.unwrap();
        transport.send_batch(b"batch 2").await.unwrap();

        let sent = transport.sent_batches();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], b"batch 1");
        assert_eq!(transport.last_sent(), Some(b"batch 2".to_vec()));
    }

    #[tokio::test]
    async fn queued_statuses_are_returned_in_order() {
        let transport = MockTransport::new();
        transport.queue_status(503);
        transport.queue_status(202);

        assert_eq!(transport.send_batch(b"a").await.unwrap().status, 503);
        assert_eq!(transport.send_batch(b"a").await.unwrap().status, 202);
        // Queue drained, back to the default
        assert_eq!(transport.send_batch(b"a").await.unwrap().status, 200);
    }

    #[tokio::test]
    async fn forced_send_failure() {
        let transport = MockTransport::new();
        transport.fail_next_send(TransportError::Timeout);

        let result = transport.send_batch(b"data").await;
        assert_eq!(result, Err(TransportError::Timeout));

        // Next send should work
        assert!(transport.send_batch(b"data").await.unwrap().is_success());
        assert_eq!(transport.sent_batches().len(), 2);
    }

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.send_batch(b"from t1").await.unwrap();
        transport2.send_batch(b"from t2").await.unwrap();

        assert_eq!(transport1.sent_batches().len(), 2);

        transport2.reset();
        assert!(transport1.sent_batches().is_empty());
    }
}
