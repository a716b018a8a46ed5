//! HTTP collaborators backed by reqwest.

use async_trait::async_trait;
use engage_assets::{DownloadError, Downloader};
use engage_client::{BatchResponse, Transport, TransportError};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("engage-cli/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Fetches assets with plain GET requests.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    /// Create a downloader with default timeouts.
    pub fn new() -> reqwest::Result<Self> {
        Ok(Self { client: client()? })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        Ok(body.to_vec())
    }
}

/// Posts event batches as JSON to a collection endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport posting to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> reqwest::Result<Self> {
        Ok(Self {
            client: client()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_batch(&self, body: &[u8]) -> Result<BatchResponse, TransportError> {
        // Events stay queued until an endpoint is configured
        if self.endpoint.is_empty() {
            return Err(TransportError::ConnectionFailed(
                "no collection endpoint configured".into(),
            ));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::ConnectionFailed(e.to_string())
                } else {
                    TransportError::SendFailed(e.to_string())
                }
            })?;

        Ok(BatchResponse::new(response.status().as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_endpoint_is_never_posted() {
        let transport = HttpTransport::new("").unwrap();

        let result = transport.send_batch(b"{}").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }
}
