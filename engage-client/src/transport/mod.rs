//! Transport abstraction for event delivery.
//!
//! The dispatcher hands a fully encoded batch body to a [`Transport`] and
//! only looks at the status that comes back. How the body reaches the server
//! (HTTP client, mock, something else) is up to the implementation.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! let response = transport.send_batch(&envelope.to_json()?).await?;
//! assert!(response.is_success());
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Transport errors.
///
/// Any of these means the batch may or may not have reached the server; the
/// dispatcher treats them all as "not delivered".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not reach the server.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request was sent but failed in transit.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// No response in time.
    #[error("request timed out")]
    Timeout,
}

/// Server answer to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResponse {
    /// HTTP status code.
    pub status: u16,
}

impl BatchResponse {
    /// Create a response with the given status.
    pub fn new(status: u16) -> Self {
        Self { status }
    }

    /// True for 2xx statuses, the only ones that acknowledge a batch.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends encoded event batches to the collection server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one batch body and return the server's status.
    async fn send_batch(&self, body: &[u8]) -> Result<BatchResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_batch(&self, body: &[u8]) -> Result<BatchResponse, TransportError> {
        (**self).send_batch(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_2xx_is_success() {
        assert!(BatchResponse::new(200).is_success());
        assert!(BatchResponse::new(204).is_success());
        assert!(!BatchResponse::new(199).is_success());
        assert!(!BatchResponse::new(301).is_success());
        assert!(!BatchResponse::new(500).is_success());
    }
}
