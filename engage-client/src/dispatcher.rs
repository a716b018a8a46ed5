//! Event delivery.
//!
//! The [`Dispatcher`] moves events from the [`EventQueue`] to the server one
//! batch at a time:
//!
//! ```text
//! queue prefix → BatchEnvelope (JSON) → Transport → 2xx?  → ack prefix
//!                                                  → else → keep prefix, back off
//! ```
//!
//! Only one flush runs at a time. A flush requested while another is in
//! flight returns [`FlushOutcome::Coalesced`] immediately. Failures never
//! drop events; they only stretch the delay before the background task
//! tries again.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engage_core::{Backoff, BatchLimits};
use engage_types::{BatchEnvelope, SequenceNumber, SessionId, TypesError};
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::queue::{EventQueue, QueueError};
use crate::transport::{Transport, TransportError};

/// Reasons a flush did not deliver its batch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request did not complete.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with a non-2xx status.
    #[error("server rejected batch with status {status}")]
    Rejected {
        /// Response status.
        status: u16,
    },

    /// Persisting the acknowledgement failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The batch could not be encoded.
    #[error("encoding error: {0}")]
    Encode(#[from] TypesError),
}

/// Result of one [`Dispatcher::flush`] call.
#[derive(Debug)]
pub enum FlushOutcome {
    /// A batch was acknowledged and removed from the queue.
    Delivered {
        /// Events in the batch.
        count: usize,
        /// Last sequence number in the batch.
        through: SequenceNumber,
    },
    /// Nothing was pending.
    Idle,
    /// Another flush was already in flight; no request was made.
    Coalesced,
    /// The batch was not delivered and stays queued.
    Failed {
        /// What went wrong.
        error: DispatchError,
        /// How long the background task waits before trying again.
        retry_in: Duration,
    },
}

impl FlushOutcome {
    /// Check if a batch was delivered.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Identity attached to every batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    /// Host application's user identifier.
    pub user: String,
    /// Host application version.
    pub app_version: String,
}

/// Dispatcher settings.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Per-batch bounds.
    pub limits: BatchLimits,
    /// Delay growth after consecutive failures.
    pub backoff: Backoff,
    /// Background flush period.
    pub flush_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            limits: BatchLimits::new(50, 256 * 1024),
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(300))
                .with_jitter(Duration::from_millis(500)),
            flush_interval: Duration::from_secs(30),
        }
    }
}

/// Resets the in-flight flag when the flush ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Delivers queued events through a [`Transport`].
#[derive(Debug)]
pub struct Dispatcher<T> {
    queue: Arc<EventQueue>,
    transport: T,
    session: SessionId,
    identity: DeviceIdentity,
    config: DispatchConfig,
    in_flight: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl<T: Transport> Dispatcher<T> {
    /// Create a dispatcher for `queue`.
    pub fn new(
        queue: Arc<EventQueue>,
        transport: T,
        session: SessionId,
        identity: DeviceIdentity,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            session,
            identity,
            config,
            in_flight: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// The queue being drained.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Session id sent with every batch.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Active settings.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Check if a flush is running.
    pub fn is_flushing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Failed flushes since the last successful one.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Send the oldest pending batch.
    pub async fn flush(&self) -> FlushOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("Flush already in flight; coalescing");
            return FlushOutcome::Coalesced;
        }
        let _in_flight = InFlight(&self.in_flight);

        let Some(batch) = self.queue.select_batch(self.config.limits).await else {
            return FlushOutcome::Idle;
        };
        let (Some(first), Some(through)) = (batch.first(), batch.last()) else {
            return FlushOutcome::Idle;
        };
        let count = batch.len();

        match self.deliver(batch.events, through).await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Release);
                tracing::info!("Delivered {} events ({:?}..={:?})", count, first, through);
                FlushOutcome::Delivered { count, through }
            }
            Err(error) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                let retry_in = self.config.backoff.delay(failures);
                tracing::warn!(
                    "Flush of {} events failed ({}); retry in {:?} (failure #{})",
                    count,
                    error,
                    retry_in,
                    failures
                );
                FlushOutcome::Failed { error, retry_in }
            }
        }
    }

    async fn deliver(
        &self,
        events: Vec<engage_types::EventRecord>,
        through: SequenceNumber,
    ) -> Result<(), DispatchError> {
        let envelope = BatchEnvelope {
            session_token: self.session,
            user: self.identity.user.clone(),
            app_version: self.identity.app_version.clone(),
            data: events,
        };
        let body = envelope.to_json()?;

        let response = self.transport.send_batch(&body).await?;
        if !response.is_success() {
            return Err(DispatchError::Rejected {
                status: response.status,
            });
        }

        self.queue.ack_through(through).await?;
        Ok(())
    }
}

/// Spawn the background flush task.
///
/// The task flushes every `flush_interval`, whenever `wake` is notified, and
/// back-to-back while a backlog remains. After a failure it sleeps for the
/// backoff delay and ignores wake-ups until that delay has passed. It exits
/// when `shutdown` changes or its sender is dropped.
pub fn spawn_flush_task<T>(
    dispatcher: Arc<Dispatcher<T>>,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: Transport + 'static,
{
    tokio::spawn(async move {
        let interval = dispatcher.config().flush_interval;
        tracing::info!("Flush task started (interval: {:?})", interval);

        let mut delay = interval;
        let mut backing_off = false;

        loop {
            if backing_off {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wake.notified() => {}
                    _ = shutdown.changed() => break,
                }
            }

            let outcome = dispatcher.flush().await;
            (delay, backing_off) = match outcome {
                FlushOutcome::Failed { retry_in, .. } => (retry_in, true),
                FlushOutcome::Delivered { .. } if !dispatcher.queue().is_empty().await => {
                    (Duration::ZERO, false)
                }
                _ => (interval, false),
            };
        }

        tracing::info!("Flush task stopped");
    })
}
